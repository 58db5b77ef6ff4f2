//! SOCKS5 overlay proxy configuration.

use serde::{Deserialize, Serialize};

use super::TlsConfig;

/// SOCKS5 listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocksConfig {
    #[serde(default = "default_socks_listen")]
    pub listen: String,
    /// Username/password credentials (RFC 1929). When absent, the listener
    /// negotiates NO AUTHENTICATION.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SocksAuthConfig>,
    /// Domains to intercept; anything else is tunneled as opaque bytes.
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    /// Certificate material used to unwrap TLS for intercepted HTTPS
    /// domains. Generated externally; when absent, intercepted TLS traffic
    /// degrades to a transparent pipe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocksAuthConfig {
    pub username: String,
    pub password: String,
}

/// One intercepted-domain entry. The request's effective domain (from SNI or
/// the Host header) is tested against `pattern`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
    /// Regex matched against the full domain name.
    pub pattern: String,
    /// When on, requests matching no endpoint rule are transparently
    /// forwarded to the real resolved backend instead of returning 404.
    #[serde(default)]
    pub overlay_mode: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_socks_listen() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_socks_config() {
        let yaml = r#"
listen: "0.0.0.0:1080"
auth:
  username: dev
  password: hunter2
domains:
  - pattern: "api\\.test\\.local"
    overlay_mode: true
  - pattern: ".*\\.mock\\.local"
"#;
        let cfg: SocksConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:1080");
        assert_eq!(cfg.auth.as_ref().unwrap().username, "dev");
        assert_eq!(cfg.domains.len(), 2);
        assert!(cfg.domains[0].overlay_mode);
        assert!(!cfg.domains[1].overlay_mode);
        assert!(cfg.domains[1].enabled);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn listen_defaults() {
        let cfg: SocksConfig = serde_yaml::from_str("domains: []").unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:1080");
        assert!(cfg.auth.is_none());
    }
}
