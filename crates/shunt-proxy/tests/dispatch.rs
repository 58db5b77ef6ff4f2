//! End-to-end dispatch tests over a live listener: mock rules, templating,
//! validation, forwarding, and transformation.

use std::net::SocketAddr;
use std::sync::Arc;

use shunt_proxy::config::Config;
use shunt_proxy::proxy::create_http_client;
use shunt_proxy::server::HttpServer;
use shunt_proxy::state::EngineState;

async fn start_server(config_yaml: &str) -> (SocketAddr, Arc<EngineState>) {
    let config: Config = serde_yaml::from_str(config_yaml).expect("test config parses");
    config.validate().expect("test config is valid");

    let state = EngineState::new(config);
    let client = create_http_client(&state.config().connection_pool);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(Arc::clone(&state), client);
    tokio::spawn(server.run_on(listener));

    (addr, state)
}

#[tokio::test]
async fn health_scenario_matches_exactly() {
    let (addr, _state) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: health
          path_pattern: "/health"
          methods: ["GET"]
          status_code: 200
          body: '{"status":"ok"}'
"#,
    )
    .await;

    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"status":"ok"}"#);

    // Exact pattern: /healthx falls through to not-found.
    let response = client
        .get(format!("http://{addr}/healthx"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn regex_validation_feeds_template_vars() {
    let (addr, _state) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: extract-id
          path_pattern: "/submit"
          methods: ["POST"]
          request_validation:
            mode: regex
            pattern: '"id":\s*"(?P<id>\d+)"'
          response_mode: template
          body: '{{.Vars.id}}'
"#,
    )
    .await;

    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/submit"))
        .body(r#"{"id":"7"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "7");

    // Validation failure means the rule doesn't match at all.
    let response = client
        .post(format!("http://{addr}/submit"))
        .body(r#"{"id":"x"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn path_params_and_script_responses() {
    let (addr, _state) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: user
          path_pattern: "/users/:id"
          methods: ["GET"]
          response_mode: script
          script_body: |
            response.status = 200;
            response.headers["content-type"] = "application/json";
            response.body = `{"user":"${request.params["id"]}"}`;
"#,
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/users/42")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"user":"42"}"#);

    // One segment only.
    let response = reqwest::get(format!("http://{addr}/users/42/posts"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn forwarding_transforms_headers_and_status() {
    // Backend echoes a request header through a template and serves a 503.
    let (backend_addr, _backend) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: echo-env
          path_pattern: "/echo"
          methods: ["GET"]
          response_mode: template
          body: 'env={{.Headers.x-env}} secret={{.Headers.x-secret}}'
      - rule:
          id: failing
          path_pattern: "/fail"
          methods: ["GET"]
          status_code: 503
          body: backend says no
"#,
    )
    .await;

    let (addr, _state) = start_server(&format!(
        r#"
endpoints:
  - path_prefix: "/"
    type: forward
    forward:
      backend_url: "http://{backend_addr}"
      timeout_ms: 5000
      inbound_headers:
        - name: x-secret
          mode: drop
        - name: x-env
          mode: replace
          value: staging
        - name: x-env
          mode: replace
          value: production
      outbound_headers:
        - name: x-proxied
          mode: replace
          value: "yes"
      status_translation:
        - from: "5xx"
          to: 299
"#
    ))
    .await;

    let client = reqwest::Client::new();

    // Later replace wins; the dropped header never reaches the backend.
    let response = client
        .get(format!("http://{addr}/echo"))
        .header("x-secret", "hunter2")
        .header("x-env", "local")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-proxied").unwrap(), "yes");
    assert_eq!(response.text().await.unwrap(), "env=production secret=");

    // 503 from the backend is translated by the 5xx wildcard.
    let response = client
        .get(format!("http://{addr}/fail"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 299);
    assert_eq!(response.text().await.unwrap(), "backend says no");
}

#[tokio::test]
async fn forwarding_body_transform_rewrites_response() {
    let (backend_addr, _backend) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: data
          path_pattern: "/data"
          methods: ["GET"]
          body: '{"host":"internal"}'
"#,
    )
    .await;

    let (addr, _state) = start_server(&format!(
        r#"
endpoints:
  - path_prefix: "/"
    type: forward
    forward:
      backend_url: "http://{backend_addr}"
      body_transform: 'body.replace("internal", "external"); body'
"#
    ))
    .await;

    let response = reqwest::get(format!("http://{addr}/data")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), r#"{"host":"external"}"#);
}

#[tokio::test]
async fn mock_rules_shadow_forwarding() {
    let (backend_addr, _backend) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: backend
          path_pattern: "/api/*"
          methods: ["GET"]
          body: from-backend
"#,
    )
    .await;

    let (addr, _state) = start_server(&format!(
        r#"
endpoints:
  - path_prefix: "/"
    type: forward
    items:
      - rule:
          id: intercepted
          path_pattern: "/api/intercepted"
          methods: ["GET"]
          body: from-mock
    forward:
      backend_url: "http://{backend_addr}"
"#
    ))
    .await;

    // The mock rule wins where it matches; everything else falls through.
    let response = reqwest::get(format!("http://{addr}/api/intercepted"))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "from-mock");

    let response = reqwest::get(format!("http://{addr}/api/other")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "from-backend");
}

#[tokio::test]
async fn unreachable_backend_yields_gateway_error() {
    let (addr, _state) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    type: forward
    forward:
      backend_url: "http://127.0.0.1:9"
      timeout_ms: 2000
"#,
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/anything")).await.unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn strip_translation_and_request_records() {
    let (addr, state) = start_server(
        r#"
endpoints:
  - path_prefix: "/api"
    translation:
      mode: strip
    items:
      - rule:
          id: ping
          path_pattern: "/ping"
          methods: ["GET"]
          body: pong
"#,
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/api/ping")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "pong");

    let records = state.records.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "GET");
    // Records carry the original request path, not the translated one.
    assert_eq!(records[0].path, "/api/ping");
    assert_eq!(records[0].status, 200);
    assert_eq!(records[0].rule_id.as_deref(), Some("ping"));
    assert!(records[0].source.is_some());
}

#[tokio::test]
async fn configuration_replacement_is_live() {
    let (addr, state) = start_server(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: old
          path_pattern: "/version"
          methods: ["GET"]
          body: v1
"#,
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/version")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "v1");

    let new_config: Config = serde_yaml::from_str(
        r#"
endpoints:
  - path_prefix: "/"
    items:
      - rule:
          id: new
          path_pattern: "/version"
          methods: ["GET"]
          body: v2
"#,
    )
    .unwrap();
    state.replace_config(new_config);

    let response = reqwest::get(format!("http://{addr}/version")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "v2");
}
