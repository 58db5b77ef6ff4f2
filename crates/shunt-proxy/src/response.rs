//! Response generation for matched mock rules.
//!
//! The three response modes are a tagged variant with one evaluation path per
//! tag: `static` emits the rule verbatim, `template` renders the body against
//! the request, `script` hands a mutable response object to user code. A
//! script runtime error produces a fixed 500 plus a logged cause — it never
//! crashes the serving task.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::cache::Caches;
use crate::config::{ResponseMode, Rule};
use crate::matcher::InboundRequest;
use crate::pattern::PathParams;
use crate::scripting::{
    run_response_script, CompiledProgram, ScriptResponse, SCRIPT_WALL_BUDGET,
};
use crate::template::{render, TemplateContext};

/// Build an error response with a JSON body.
pub fn error_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = format!(r#"{{"error": "{message}"}}"#);
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Fixed response when no endpoint or rule applies.
pub fn not_found_response() -> Response<Full<Bytes>> {
    error_response(404, "no matching rule")
}

/// Fixed response for a failed script execution.
pub fn internal_error_response() -> Response<Full<Bytes>> {
    error_response(500, "internal error")
}

/// Fixed response for backend failures (timeout, refused connection, DNS).
pub fn gateway_error_response() -> Response<Full<Bytes>> {
    error_response(502, "bad gateway")
}

/// Generate the response for a matched rule.
///
/// The configured `response_delay` (or the delay a script sets) is honored
/// here, after the body is computed and before it is written.
pub async fn generate(
    rule: &Rule,
    request: &InboundRequest,
    params: &PathParams,
    vars: &HashMap<String, String>,
    caches: &Caches,
) -> Response<Full<Bytes>> {
    let (response, delay_ms) = evaluate(rule, request, params, vars, caches);

    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    response
}

fn evaluate(
    rule: &Rule,
    request: &InboundRequest,
    params: &PathParams,
    vars: &HashMap<String, String>,
    caches: &Caches,
) -> (Response<Full<Bytes>>, u64) {
    match rule.response_mode {
        ResponseMode::Static => (
            build(rule.status_code, &rule.headers, rule.body.clone()),
            rule.response_delay_ms,
        ),

        ResponseMode::Template => {
            let ctx = TemplateContext {
                method: request.method.clone(),
                path: request.path.clone(),
                params: params.clone(),
                query: request.query.clone(),
                headers: request.headers.clone(),
                vars: vars.clone(),
                body: request.body.clone(),
                json: serde_json::from_str(&request.body).ok(),
            };
            let body = render(&rule.body, &ctx);
            (
                build(rule.status_code, &rule.headers, body),
                rule.response_delay_ms,
            )
        }

        ResponseMode::Script => {
            let Some(script) = rule.script_body.as_deref() else {
                warn!(rule = %rule.id, "script response mode without a script body");
                return (internal_error_response(), 0);
            };
            let program = caches.scripts.get_or_compile(script, CompiledProgram::compile);
            let Some(ast) = program.ast() else {
                // Matching filters these out; reaching here means the cache
                // was invalidated mid-flight. Fail the request, not the task.
                return (internal_error_response(), 0);
            };

            let initial = ScriptResponse {
                status: rule.status_code,
                headers: rule.headers.clone(),
                body: rule.body.clone(),
                delay_ms: rule.response_delay_ms,
            };
            let script_request = request.script_request(params, vars);
            match run_response_script(ast, &script_request, initial, SCRIPT_WALL_BUDGET) {
                Ok(out) => {
                    let delay = out.delay_ms;
                    (build(out.status, &out.headers, out.body), delay)
                }
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "response script failed");
                    (internal_error_response(), 0)
                }
            }
        }
    }
}

fn build(status: u16, headers: &HashMap<String, String>, body: String) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|e| {
            warn!(error = %e, "rule produced an unbuildable response");
            internal_error_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn rule_yaml(yaml: &str) -> Rule {
        serde_yaml::from_str(yaml).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request() -> InboundRequest {
        InboundRequest {
            method: "GET".to_string(),
            path: "/users/42".to_string(),
            body: r#"{"id": "7"}"#.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn static_mode_emits_verbatim() {
        let rule = rule_yaml(
            r#"
path_pattern: "/health"
methods: ["GET"]
status_code: 200
headers:
  content-type: application/json
body: '{"status":"ok"}'
"#,
        );
        let caches = Caches::new();
        let response = generate(&rule, &request(), &PathParams::new(), &HashMap::new(), &caches).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(body_string(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn template_mode_resolves_vars() {
        let rule = rule_yaml(
            r#"
path_pattern: "/users/:id"
methods: ["GET"]
response_mode: template
body: '{{.Vars.id}}'
"#,
        );
        let caches = Caches::new();
        let mut vars = HashMap::new();
        vars.insert("id".to_string(), "7".to_string());
        let response = generate(&rule, &request(), &PathParams::new(), &vars, &caches).await;
        assert_eq!(body_string(response).await, "7");
    }

    #[tokio::test]
    async fn script_mode_builds_response() {
        let rule = rule_yaml(
            r#"
path_pattern: "/users/:id"
methods: ["GET"]
response_mode: script
script_body: |
  response.status = 418;
  response.headers["x-kind"] = "teapot";
  response.body = `user ${request.params["id"]}`;
"#,
        );
        let caches = Caches::new();
        let mut params = PathParams::new();
        params.insert("id".to_string(), "42".to_string());
        let response = generate(&rule, &request(), &params, &HashMap::new(), &caches).await;
        assert_eq!(response.status(), 418);
        assert_eq!(response.headers().get("x-kind").unwrap(), "teapot");
        assert_eq!(body_string(response).await, "user 42");
    }

    #[tokio::test]
    async fn script_runtime_error_yields_500() {
        let rule = rule_yaml(
            r#"
path_pattern: "/x"
methods: ["GET"]
response_mode: script
script_body: 'throw "boom";'
"#,
        );
        let caches = Caches::new();
        let response = generate(&rule, &request(), &PathParams::new(), &HashMap::new(), &caches).await;
        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn delay_is_honored_after_computation() {
        let rule = rule_yaml(
            r#"
path_pattern: "/slow"
methods: ["GET"]
body: ok
response_delay_ms: 80
"#,
        );
        let caches = Caches::new();
        let start = std::time::Instant::now();
        let response = generate(&rule, &request(), &PathParams::new(), &HashMap::new(), &caches).await;
        assert!(start.elapsed() >= Duration::from_millis(80));
        assert_eq!(response.status(), 200);
    }

    #[test]
    fn fixed_responses() {
        assert_eq!(not_found_response().status(), 404);
        assert_eq!(internal_error_response().status(), 500);
        assert_eq!(gateway_error_response().status(), 502);
    }
}
