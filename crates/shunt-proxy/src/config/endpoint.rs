//! Endpoint, rule, and group configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::forward::ForwardConfig;
use super::validation::RequestValidation;

/// A mount point: a path-prefix-scoped group of rules, either serving mock
/// responses or forwarding to a backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoint {
    pub path_prefix: String,
    /// How the request path is rewritten before rule matching. Applied once
    /// per request; fixed for that request's lifetime.
    #[serde(default)]
    pub translation: Translation,
    #[serde(default, rename = "type")]
    pub kind: EndpointKind,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub items: Vec<Item>,
    /// Backend configuration; required when `kind` is `forward`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<ForwardConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    #[default]
    Mock,
    Forward,
}

/// Path translation applied before matching begins.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Translation {
    /// Match against the request path unchanged.
    #[default]
    None,
    /// Remove the endpoint's `path_prefix` before matching.
    Strip,
    /// Regex replace: `pattern` → `replacement`.
    Translate { pattern: String, replacement: String },
}

/// An ordered entry in an endpoint: a rule, or a named togglable group of
/// rules. Order is the tie-break for overlapping matches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Item {
    Rule(Rule),
    Group(Group),
}

/// A named container of rules. Disabling it skips every contained rule as if
/// absent, without disturbing the ordering of items that follow.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Group {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One match condition (method/path/validation) plus a response policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    #[serde(default = "default_rule_id")]
    pub id: String,
    pub path_pattern: String,
    /// Accepted HTTP methods; must be non-empty.
    pub methods: Vec<String>,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    /// Script evaluated in `script` response mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_body: Option<String>,
    #[serde(default)]
    pub request_validation: RequestValidation,
    /// Artificial pause in milliseconds, applied after the body is computed
    /// and before it is written.
    #[serde(default)]
    pub response_delay_ms: u64,
    /// Which intercepted domains this rule applies to. Only consulted when a
    /// domain context is present (SOCKS interception, or a Host header).
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub domain_scope: DomainScope,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Static,
    Template,
    Script,
}

/// Domain scoping for rules matched with interception context.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum DomainScope {
    /// Applies regardless of domain.
    #[default]
    Any,
    /// Applies to any request that arrived via domain interception.
    AllIntercepted,
    /// Applies only to domains matching one of these regex patterns.
    Specific(Vec<String>),
}

fn default_enabled() -> bool {
    true
}

fn default_status_code() -> u16 {
    200
}

fn default_rule_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
