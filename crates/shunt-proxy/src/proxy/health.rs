//! Background backend health probes.
//!
//! One probe task per forwarding endpoint with health checks configured.
//! Health state is observability: transitions are logged and the flag is
//! queryable; forwarding itself always surfaces the backend's real answer.

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::client::HttpClient;
use crate::config::HealthCheckConfig;

pub struct BackendHealth {
    healthy: AtomicBool,
}

impl BackendHealth {
    fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Spawn the periodic probe task for one backend.
pub fn spawn_probe(
    client: HttpClient,
    backend_url: String,
    cfg: HealthCheckConfig,
) -> Arc<BackendHealth> {
    let health = Arc::new(BackendHealth::new());
    let state = Arc::clone(&health);

    tokio::spawn(async move {
        let uri = format!("{}{}", backend_url.trim_end_matches('/'), cfg.path);
        let mut interval = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let ok = probe(&client, &uri).await;
            let was = state.healthy.swap(ok, Ordering::Relaxed);
            if was != ok {
                if ok {
                    info!(backend = %backend_url, "backend recovered");
                } else {
                    warn!(backend = %backend_url, probe = %uri, "backend unhealthy");
                }
            }
        }
    });

    health
}

async fn probe(client: &HttpClient, uri: &str) -> bool {
    let Ok(request) = Request::builder().uri(uri).body(BoxBody::new(
        Full::new(Bytes::new()).map_err(|never: Infallible| match never {}),
    )) else {
        return false;
    };

    match client.request(request).await {
        Ok(response) => {
            let healthy = response.status().is_success() || response.status().is_redirection();
            // Drain so the pooled connection is reusable.
            let _ = response.into_body().collect().await;
            healthy
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy() {
        assert!(BackendHealth::new().is_healthy());
    }
}
