//! Shared engine state: the compiled configuration snapshot, the artifact
//! caches, and the request record stream.
//!
//! Matching reads clone an `Arc` snapshot and never evaluate under the lock;
//! configuration replacement is exclusive relative to matching — it compiles
//! the new structure, invalidates every cache, and swaps the snapshot in.

use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::Caches;
use crate::config::Config;
use crate::logging::RecordStream;
use crate::matcher::EndpointSet;

/// A compiled intercepted-domain entry.
pub struct CompiledDomain {
    pub pattern: Regex,
    pub overlay_mode: bool,
}

impl CompiledDomain {
    pub fn matches(&self, domain: &str) -> bool {
        self.pattern.is_match(domain)
    }
}

/// Result of matching a domain against the interception list.
#[derive(Debug, Clone, Copy)]
pub struct DomainMatch {
    pub overlay_mode: bool,
}

pub struct EngineState {
    endpoints: RwLock<Arc<EndpointSet>>,
    domains: RwLock<Arc<Vec<CompiledDomain>>>,
    config: RwLock<Arc<Config>>,
    pub caches: Caches,
    pub records: RecordStream,
}

impl EngineState {
    pub fn new(config: Config) -> Arc<Self> {
        let caches = Caches::new();
        let endpoints = EndpointSet::compile(&config.endpoints, &caches);
        let domains = compile_domains(&config);
        let records = RecordStream::new(config.log.capacity);

        Arc::new(Self {
            endpoints: RwLock::new(Arc::new(endpoints)),
            domains: RwLock::new(Arc::new(domains)),
            config: RwLock::new(Arc::new(config)),
            caches,
            records,
        })
    }

    /// Current compiled endpoint snapshot.
    pub fn endpoints(&self) -> Arc<EndpointSet> {
        Arc::clone(&self.endpoints.read())
    }

    /// Current compiled intercepted-domain list.
    pub fn domains(&self) -> Arc<Vec<CompiledDomain>> {
        Arc::clone(&self.domains.read())
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    /// Atomically replace the whole configuration.
    ///
    /// All artifact caches are invalidated first so stale compilations can't
    /// leak into the new structure; the snapshot swap is the only point where
    /// matching is briefly locked out.
    pub fn replace_config(&self, config: Config) {
        self.caches.invalidate();

        let endpoints = Arc::new(EndpointSet::compile(&config.endpoints, &self.caches));
        let domains = Arc::new(compile_domains(&config));

        *self.endpoints.write() = endpoints;
        *self.domains.write() = domains;
        *self.config.write() = Arc::new(config);

        info!("configuration replaced; caches invalidated");
    }

    /// Match a domain against the enabled interception list. The first
    /// matching entry wins; returns its overlay flag.
    pub fn match_domain(&self, domain: &str) -> Option<DomainMatch> {
        self.domains().iter().find(|d| d.matches(domain)).map(|d| DomainMatch {
            overlay_mode: d.overlay_mode,
        })
    }
}

fn compile_domains(config: &Config) -> Vec<CompiledDomain> {
    let Some(socks) = &config.socks else {
        return Vec::new();
    };
    socks
        .domains
        .iter()
        .filter(|d| d.enabled)
        .filter_map(|d| match Regex::new(&d.pattern) {
            Ok(pattern) => Some(CompiledDomain {
                pattern,
                overlay_mode: d.overlay_mode,
            }),
            Err(e) => {
                warn!(pattern = %d.pattern, error = %e, "invalid domain pattern skipped");
                None
            }
        })
        .collect()
}
