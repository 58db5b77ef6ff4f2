//! Upstream HTTP client creation.
//!
//! One pooled client is shared by every forwarding endpoint; the backend URL
//! decides the scheme per request.

use crate::config::ConnectionPoolConfig;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Type alias for the pooled upstream client.
pub type HttpClient = Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    BoxBody<Bytes, hyper::Error>,
>;

/// Create the shared HTTP client with connection pooling.
pub fn create_http_client(pool: &ConnectionPoolConfig) -> HttpClient {
    // Pin the process-level TLS provider; a no-op when already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = hyper_util::client::legacy::connect::HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS backends

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .expect("Failed to load native root certificates")
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    debug!(
        max_idle = pool.max_idle_per_host,
        idle_timeout_secs = pool.idle_timeout_secs,
        keepalive_secs = pool.keepalive_timeout_secs,
        "upstream connection pool configured"
    );

    client
}
