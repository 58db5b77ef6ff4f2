//! Overlay-mode DNS cache.
//!
//! `domain → resolved address` with a fixed TTL; entries are created on
//! first lookup and recomputed on next access after expiry. Time-based, not
//! LRU — no background sweeper.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DNS_TTL: Duration = Duration::from_secs(300);

pub struct DnsCache {
    entries: RwLock<HashMap<String, (IpAddr, Instant)>>,
    ttl: Duration,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::with_ttl(DNS_TTL)
    }
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached address for a domain, if still within TTL.
    pub fn get(&self, domain: &str) -> Option<IpAddr> {
        let entries = self.entries.read();
        let (ip, inserted) = entries.get(domain)?;
        (inserted.elapsed() < self.ttl).then_some(*ip)
    }

    pub fn insert(&self, domain: &str, ip: IpAddr) {
        self.entries
            .write()
            .insert(domain.to_string(), (ip, Instant::now()));
    }

    /// Resolve a domain, reusing the cached address within TTL.
    pub async fn resolve(&self, domain: &str, port: u16) -> io::Result<SocketAddr> {
        if let Some(ip) = self.get(domain) {
            return Ok(SocketAddr::new(ip, port));
        }

        // Lookup happens outside the lock; a racing resolve of the same
        // domain overwrites idempotently.
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain, port)).await?.collect();
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {domain}"))
            })?;

        debug!(domain, ip = %addr.ip(), "resolved and cached");
        self.insert(domain, addr.ip());
        Ok(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
