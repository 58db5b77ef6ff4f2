//! Request forwarding to a real backend, with transformation.
//!
//! Pipeline per request: inbound header manipulations → forward with timeout
//! → outbound header manipulations → status translation → optional body
//! transform. Backend failures surface as a fixed gateway error immediately;
//! there is no retry policy here.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, Uri};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::client::HttpClient;
use super::headers::apply_manipulations;
use super::status::translate_status;
use crate::cache::Caches;
use crate::config::ForwardConfig;
use crate::matcher::InboundRequest;
use crate::response::gateway_error_response;
use crate::scripting::{run_body_transform, CompiledProgram, SCRIPT_WALL_BUDGET};

/// Forward a fully-buffered request to the configured backend and transform
/// the response on the way back.
pub async fn forward_request(
    client: &HttpClient,
    cfg: &ForwardConfig,
    request: &InboundRequest,
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
    caches: &Caches,
) -> Response<Full<Bytes>> {
    let script_request = request.script_request(&Default::default(), &Default::default());

    // Inbound manipulations operate on a copy of the client's headers; the
    // host header always belongs to the backend, and the buffered body is
    // re-framed by the client.
    let mut out_headers = headers;
    out_headers.remove(hyper::header::HOST);
    out_headers.remove(hyper::header::CONTENT_LENGTH);
    out_headers.remove(hyper::header::TRANSFER_ENCODING);
    apply_manipulations(&mut out_headers, &cfg.inbound_headers, &script_request, caches);

    let uri = format!(
        "{}{}",
        cfg.backend_url.trim_end_matches('/'),
        path_and_query
    );
    let uri: Uri = match uri.parse() {
        Ok(uri) => uri,
        Err(e) => {
            error!(backend = %cfg.backend_url, error = %e, "unparseable backend URI");
            return gateway_error_response();
        }
    };

    debug!(%uri, "forwarding to backend");

    let mut upstream_req = Request::builder().method(method).uri(uri);
    for (name, value) in out_headers.iter() {
        upstream_req = upstream_req.header(name, value);
    }
    let upstream_req = match upstream_req.body(BoxBody::new(
        Full::new(body).map_err(|never: Infallible| match never {}),
    )) {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to build upstream request");
            return gateway_error_response();
        }
    };

    let timeout = Duration::from_millis(cfg.timeout_ms);
    let upstream_response = match tokio::time::timeout(timeout, client.request(upstream_req)).await
    {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(backend = %cfg.backend_url, error = %e, "backend request failed");
            return gateway_error_response();
        }
        Err(_) => {
            error!(backend = %cfg.backend_url, timeout_ms = cfg.timeout_ms, "backend request timed out");
            return gateway_error_response();
        }
    };

    let (mut parts, incoming) = upstream_response.into_parts();
    let body_bytes = match incoming.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(backend = %cfg.backend_url, error = %e, "failed to read backend response body");
            return gateway_error_response();
        }
    };

    apply_manipulations(&mut parts.headers, &cfg.outbound_headers, &script_request, caches);

    if !cfg.status_passthrough {
        let translated = translate_status(&cfg.status_translation, parts.status.as_u16());
        if let Ok(status) = hyper::StatusCode::from_u16(translated) {
            parts.status = status;
        } else {
            warn!(translated, "status translation produced an invalid code; passing through");
        }
    }

    let body_bytes = match &cfg.body_transform {
        Some(script) => transform_body(script, body_bytes, parts.status.as_u16(), caches),
        None => Some(body_bytes),
    };
    let Some(body_bytes) = body_bytes else {
        return crate::response::internal_error_response();
    };

    // The body is fully buffered and may have changed size; let hyper
    // recompute framing.
    parts.headers.remove(hyper::header::CONTENT_LENGTH);
    parts.headers.remove(hyper::header::TRANSFER_ENCODING);

    Response::from_parts(parts, Full::new(body_bytes))
}

fn transform_body(script: &str, body: Bytes, status: u16, caches: &Caches) -> Option<Bytes> {
    let program = caches.scripts.get_or_compile(script, CompiledProgram::compile);
    let ast = program.ast()?;
    let text = String::from_utf8_lossy(&body);
    match run_body_transform(ast, &text, status, SCRIPT_WALL_BUDGET) {
        Ok(transformed) => Some(Bytes::from(transformed)),
        Err(e) => {
            warn!(error = %e, "body transform failed");
            None
        }
    }
}
