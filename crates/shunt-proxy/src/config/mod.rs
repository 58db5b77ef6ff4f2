//! Configuration types for the interception engine.

mod endpoint;
mod forward;
mod socks;
mod validation;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub use endpoint::{DomainScope, Endpoint, EndpointKind, Group, Item, ResponseMode, Rule, Translation};
pub use forward::{
    ForwardConfig, HeaderAction, HeaderManipulation, HealthCheckConfig, StatusTranslation,
};
pub use socks::{DomainConfig, SocksAuthConfig, SocksConfig};
pub use validation::{RequestValidation, StaticMatchType};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    /// Ordered endpoint list; order breaks longest-prefix ties.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks: Option<SocksConfig>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Certificate material (generated externally) wrapping the same serving
    /// entry point used for plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// In-memory request record stream settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

/// Upstream HTTP client pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,
    #[serde(default = "default_keepalive")]
    pub keepalive_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_idle_per_host: default_max_idle(),
            keepalive_timeout_secs: default_keepalive(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants that serde alone can't express.
    pub fn validate(&self) -> Result<(), EngineError> {
        for endpoint in &self.endpoints {
            if endpoint.kind == EndpointKind::Forward && endpoint.forward.is_none() {
                return Err(EngineError::Invalid(format!(
                    "endpoint '{}' has type 'forward' but no 'forward' configuration",
                    endpoint.path_prefix
                )));
            }
            if let Some(forward) = &endpoint.forward {
                for translation in &forward.status_translation {
                    if !crate::proxy::pattern_is_valid(&translation.from) {
                        tracing::warn!(
                            endpoint = %endpoint.path_prefix,
                            pattern = %translation.from,
                            "malformed status translation pattern will never match"
                        );
                    }
                }
            }
            for rule in endpoint_rules(endpoint) {
                if rule.methods.is_empty() {
                    return Err(EngineError::Invalid(format!(
                        "rule '{}' in endpoint '{}' has an empty method set",
                        rule.id, endpoint.path_prefix
                    )));
                }
                if rule.response_mode == ResponseMode::Script && rule.script_body.is_none() {
                    return Err(EngineError::Invalid(format!(
                        "rule '{}' uses response_mode 'script' but has no script_body",
                        rule.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Iterate every rule in an endpoint, including rules inside groups.
pub fn endpoint_rules(endpoint: &Endpoint) -> impl Iterator<Item = &Rule> {
    endpoint.items.iter().flat_map(|item| match item {
        Item::Rule(rule) => std::slice::from_ref(rule).iter(),
        Item::Group(group) => group.rules.iter(),
    })
}

fn default_port() -> u16 {
    8080
}

fn default_log_capacity() -> usize {
    1000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_max_idle() -> usize {
    32
}

fn default_keepalive() -> u64 {
    60
}
