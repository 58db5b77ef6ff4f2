//! Forwarding (reverse proxy) configuration for an endpoint.

use serde::{Deserialize, Serialize};

/// Backend configuration for a forwarding endpoint.
///
/// `backend_url` is an opaque resolved URL: collaborators may substitute a
/// dynamically-assigned local address at any time and the forwarder treats
/// it as just another value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    pub backend_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// When set, backend status codes pass through untranslated.
    #[serde(default)]
    pub status_passthrough: bool,
    #[serde(default)]
    pub status_translation: Vec<StatusTranslation>,
    /// Manipulations applied to the outgoing (client → backend) request.
    #[serde(default)]
    pub inbound_headers: Vec<HeaderManipulation>,
    /// Manipulations applied to the returning (backend → client) response.
    #[serde(default)]
    pub outbound_headers: Vec<HeaderManipulation>,
    /// Script run over the response body before it is written to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,
}

/// One header rewrite step. Steps are applied in list order; later steps may
/// overwrite earlier ones for the same header name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaderManipulation {
    pub name: String,
    #[serde(flatten)]
    pub action: HeaderAction,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum HeaderAction {
    /// Remove the header.
    Drop,
    /// Set the header to a literal value.
    Replace { value: String },
    /// Set the header to the result of a script evaluated against the
    /// original request.
    Expression { expression: String },
}

/// Remaps a backend status code before it reaches the client.
///
/// `from` is an exact code (`"404"`) or an `Nxx` wildcard (`"5xx"` covers
/// 500–599). The first matching entry wins; unmatched codes pass through.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusTranslation {
    pub from: String,
    pub to: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval() -> u64 {
    30
}
