//! The request funnel shared by every entry point.
//!
//! Both the plain/TLS HTTP listener and the SOCKS5 interception path feed
//! requests through here: build the matcher's view of the request, dispatch,
//! then mock-respond or forward. Every request leaves one structured record.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::logging::RequestRecord;
use crate::matcher::{Dispatch, InboundRequest};
use crate::proxy::{forward_request, is_websocket_upgrade, proxy_websocket, HttpClient};
use crate::response::{error_response, gateway_error_response, generate, not_found_response};
use crate::socks::DnsCache;
use crate::state::EngineState;

/// Everything a request needs, shared across connections.
#[derive(Clone)]
pub struct HandlerContext {
    pub state: Arc<EngineState>,
    pub client: HttpClient,
}

/// Context attached to requests that arrived through SOCKS domain
/// interception.
#[derive(Clone)]
pub struct InterceptContext {
    pub domain: String,
    /// Set when the matched domain has overlay mode on.
    pub overlay: Option<OverlayTarget>,
}

/// Overlay fall-through for unmatched intercepted requests: resolve the
/// domain through the shared DNS cache at miss time and forward to the real
/// backend. `tls` mirrors whether the intercepted tunnel was TLS.
#[derive(Clone)]
pub struct OverlayTarget {
    pub dns: Arc<DnsCache>,
    pub port: u16,
    pub tls: bool,
}

/// Handle one request end to end.
///
/// `intercept` is set when the request arrived through SOCKS domain
/// interception; otherwise the Host header supplies the domain context.
pub async fn handle_request(
    ctx: &HandlerContext,
    req: Request<Incoming>,
    source: Option<SocketAddr>,
    intercept: Option<InterceptContext>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = parse_query_string(req.uri().query());
    let headers = lowercased_headers(req.headers());
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let intercepted = intercept.is_some();
    let overlay = intercept.as_ref().and_then(|i| i.overlay.clone());
    let domain = intercept
        .map(|i| i.domain)
        .or_else(|| host_domain(headers.get("host")));

    // WebSocket upgrades skip the header/body pipeline: match on an empty
    // body and, for forwarding endpoints, splice a byte tunnel.
    if is_websocket_upgrade(req.headers()) {
        let inbound = InboundRequest {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            headers: headers.clone(),
            body: String::new(),
            domain: domain.clone(),
            intercepted,
        };
        if let Dispatch::Forward { forward } =
            ctx.state.endpoints().dispatch(&inbound, &ctx.state.caches)
        {
            debug!(path = %inbound.path, "proxying websocket upgrade");
            let response = proxy_websocket(&ctx.client, &forward, req).await;
            record(ctx, &inbound, response.status().as_u16(), source, None);
            return Ok(boxed(response));
        }
        // Not a forwarding match: fall through and treat it as a plain
        // request with an empty body.
        let response =
            dispatch_buffered(ctx, inbound, path_and_query, req, true, source, overlay).await;
        return Ok(boxed(response));
    }

    let inbound = InboundRequest {
        method,
        path,
        query,
        headers,
        body: String::new(),
        domain,
        intercepted,
    };
    let response =
        dispatch_buffered(ctx, inbound, path_and_query, req, false, source, overlay).await;
    Ok(boxed(response))
}

/// Buffer the body, run the matcher, and produce the response.
async fn dispatch_buffered(
    ctx: &HandlerContext,
    mut inbound: InboundRequest,
    path_and_query: String,
    req: Request<Incoming>,
    skip_body: bool,
    source: Option<SocketAddr>,
    overlay: Option<OverlayTarget>,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let body_bytes = if skip_body {
        Bytes::new()
    } else {
        match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "failed to read request body");
                let response = error_response(400, "failed to read request body");
                record(ctx, &inbound, 400, source, None);
                return response;
            }
        }
    };
    inbound.body = String::from_utf8_lossy(&body_bytes).into_owned();

    let dispatch = ctx.state.endpoints().dispatch(&inbound, &ctx.state.caches);

    match dispatch {
        Dispatch::Rule { rule, params, vars } => {
            let response = generate(&rule, &inbound, &params, &vars, &ctx.state.caches).await;
            record(
                ctx,
                &inbound,
                response.status().as_u16(),
                source,
                Some(rule.id.clone()),
            );
            response
        }
        Dispatch::Forward { forward } => {
            let response = forward_request(
                &ctx.client,
                &forward,
                &inbound,
                parts.method,
                &path_and_query,
                parts.headers,
                body_bytes,
                &ctx.state.caches,
            )
            .await;
            record(ctx, &inbound, response.status().as_u16(), source, None);
            response
        }
        Dispatch::NotFound => {
            let response = match (&overlay, inbound.domain.as_deref()) {
                // Overlay mode: unmatched intercepted requests go to the
                // real backend, resolved through the DNS cache at miss time.
                (Some(target), Some(domain)) => {
                    match target.dns.resolve(domain, target.port).await {
                        Ok(addr) => {
                            overlay_forward(ctx, parts, &path_and_query, body_bytes, addr, target.tls)
                                .await
                        }
                        Err(e) => {
                            debug!(domain, error = %e, "overlay resolution failed");
                            gateway_error_response()
                        }
                    }
                }
                _ => not_found_response(),
            };
            record(ctx, &inbound, response.status().as_u16(), source, None);
            response
        }
    }
}

/// Transparent forward of an unmatched intercepted request to the real
/// resolved backend. Headers (Host included) pass through untouched.
async fn overlay_forward(
    ctx: &HandlerContext,
    parts: hyper::http::request::Parts,
    path_and_query: &str,
    body: Bytes,
    addr: SocketAddr,
    tls: bool,
) -> Response<Full<Bytes>> {
    let scheme = if tls { "https" } else { "http" };
    let uri = format!("{scheme}://{addr}{path_and_query}");
    let Ok(uri) = uri.parse::<hyper::Uri>() else {
        return gateway_error_response();
    };

    let mut upstream_req = Request::builder().method(parts.method).uri(uri);
    for (name, value) in parts.headers.iter() {
        // The buffered body is re-framed by the client.
        if name == "content-length" || name == "transfer-encoding" {
            continue;
        }
        upstream_req = upstream_req.header(name, value);
    }
    let Ok(upstream_req) = upstream_req.body(BoxBody::new(
        Full::new(body).map_err(|never: Infallible| match never {}),
    )) else {
        return gateway_error_response();
    };

    let send = ctx.client.request(upstream_req);
    match tokio::time::timeout(OVERLAY_TIMEOUT, send).await {
        Ok(Ok(response)) => {
            let (mut parts, body) = response.into_parts();
            let bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return gateway_error_response(),
            };
            parts.headers.remove(hyper::header::CONTENT_LENGTH);
            parts.headers.remove(hyper::header::TRANSFER_ENCODING);
            Response::from_parts(parts, Full::new(bytes))
        }
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "overlay forward failed");
            gateway_error_response()
        }
        Err(_) => {
            debug!(%addr, "overlay forward timed out");
            gateway_error_response()
        }
    }
}

const OVERLAY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn record(
    ctx: &HandlerContext,
    inbound: &InboundRequest,
    status: u16,
    source: Option<SocketAddr>,
    rule_id: Option<String>,
) {
    ctx.state.records.append(RequestRecord::new(
        &inbound.method,
        &inbound.path,
        status,
        source.map(|s| s.to_string()),
        inbound.headers.clone(),
        inbound.body.clone(),
        rule_id,
    ));
}

fn boxed(response: Response<Full<Bytes>>) -> Response<BoxBody<Bytes, hyper::Error>> {
    response.map(|body| BoxBody::new(body.map_err(|never: Infallible| match never {})))
}

/// Parse a query string into a map, URL-decoding values.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let decoded = urlencoding::decode(value).unwrap_or_default().to_string();
                params.insert(key.to_string(), decoded);
            } else if !pair.is_empty() {
                params.insert(pair.to_string(), String::new());
            }
        }
    }
    params
}

/// Lowercase header names into a plain map; the first value wins for
/// repeated headers.
pub fn lowercased_headers(headers: &hyper::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

/// Strip an optional port from a Host header value.
fn host_domain(host: Option<&String>) -> Option<String> {
    host.map(|h| h.split(':').next().unwrap_or(h).to_string())
        .filter(|h| !h.is_empty())
}
