//! WebSocket passthrough.
//!
//! Upgrade requests bypass the header/body transformation pipeline entirely:
//! the handshake is relayed to the backend and, on a 101, both sides are
//! upgraded and spliced into a bidirectional byte tunnel.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, CONNECTION, UPGRADE};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tracing::{debug, error};

use super::client::HttpClient;
use crate::config::ForwardConfig;
use crate::response::gateway_error_response;

/// Detect a WebSocket upgrade request by header.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade_is_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let connection_has_upgrade = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);

    upgrade_is_websocket && connection_has_upgrade
}

/// Relay a WebSocket handshake to the backend and tunnel bytes both ways.
///
/// Takes ownership of the original request so the client side can be
/// upgraded once the 101 response has been written.
pub async fn proxy_websocket(
    client: &HttpClient,
    cfg: &ForwardConfig,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = format!("{}{}", cfg.backend_url.trim_end_matches('/'), path_and_query);
    let uri: Uri = match uri.parse() {
        Ok(uri) => uri,
        Err(e) => {
            error!(backend = %cfg.backend_url, error = %e, "unparseable backend URI for websocket");
            return gateway_error_response();
        }
    };

    // Relay the handshake verbatim, host excepted.
    let mut upstream_req = Request::builder().method(req.method().clone()).uri(uri);
    for (name, value) in req.headers() {
        if name != "host" {
            upstream_req = upstream_req.header(name, value);
        }
    }
    let upstream_req = match upstream_req.body(BoxBody::new(
        Full::new(Bytes::new()).map_err(|never: Infallible| match never {}),
    )) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to build websocket handshake request");
            return gateway_error_response();
        }
    };

    let mut upstream_response = match client.request(upstream_req).await {
        Ok(response) => response,
        Err(e) => {
            error!(backend = %cfg.backend_url, error = %e, "websocket handshake to backend failed");
            return gateway_error_response();
        }
    };

    if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        // The backend declined the upgrade; relay its answer as-is.
        let (parts, body) = upstream_response.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => Bytes::new(),
        };
        return Response::from_parts(parts, Full::new(bytes));
    }

    // Mirror the 101 to the client, then splice the two upgraded streams.
    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in upstream_response.headers() {
        response = response.header(name, value);
    }

    tokio::spawn(async move {
        let upstream_io = match hyper::upgrade::on(&mut upstream_response).await {
            Ok(io) => io,
            Err(e) => {
                error!(error = %e, "backend websocket upgrade failed");
                return;
            }
        };
        let client_io = match hyper::upgrade::on(req).await {
            Ok(io) => io,
            Err(e) => {
                error!(error = %e, "client websocket upgrade failed");
                return;
            }
        };

        let mut upstream = TokioIo::new(upstream_io);
        let mut client_side = TokioIo::new(client_io);
        match tokio::io::copy_bidirectional(&mut client_side, &mut upstream).await {
            Ok((tx, rx)) => debug!(tx, rx, "websocket tunnel closed"),
            Err(e) => debug!(error = %e, "websocket tunnel ended with error"),
        }
    });

    response
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| gateway_error_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                name.parse::<hyper::header::HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn detects_upgrade_requests() {
        assert!(is_websocket_upgrade(&headers(&[
            ("upgrade", "websocket"),
            ("connection", "Upgrade"),
        ])));
        assert!(is_websocket_upgrade(&headers(&[
            ("upgrade", "WebSocket"),
            ("connection", "keep-alive, Upgrade"),
        ])));
    }

    #[test]
    fn plain_requests_are_not_upgrades() {
        assert!(!is_websocket_upgrade(&headers(&[])));
        assert!(!is_websocket_upgrade(&headers(&[("connection", "Upgrade")])));
        assert!(!is_websocket_upgrade(&headers(&[("upgrade", "websocket")])));
        assert!(!is_websocket_upgrade(&headers(&[
            ("upgrade", "h2c"),
            ("connection", "Upgrade"),
        ])));
    }
}
