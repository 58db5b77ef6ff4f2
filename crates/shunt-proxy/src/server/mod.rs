//! HTTP listener: accept loop and per-connection serving.
//!
//! One task per accepted connection; within a connection, responses are
//! strictly ordered with requests (HTTP/1.1, no pipelining reordering).
//! An optional TLS acceptor wraps the same serving entry point.

mod handler;
mod network;
mod tls;

pub use handler::{
    handle_request, lowercased_headers, parse_query_string, HandlerContext, InterceptContext,
    OverlayTarget,
};
pub use network::create_reusable_listener;
pub use tls::create_tls_acceptor;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::proxy::{spawn_probe, BackendHealth, HttpClient};
use crate::state::EngineState;

pub struct HttpServer {
    ctx: HandlerContext,
}

impl HttpServer {
    pub fn new(state: Arc<EngineState>, client: HttpClient) -> Self {
        Self {
            ctx: HandlerContext { state, client },
        }
    }

    /// Bind the configured port and serve until the task is cancelled.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config = self.ctx.state.config();
        let addr = SocketAddr::from(([0, 0, 0, 0], config.listen.port));
        let listener = create_reusable_listener(addr)?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener (lets tests use ephemeral ports).
    pub async fn run_on(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let config = self.ctx.state.config();

        let tls_acceptor = match &config.listen.tls {
            Some(tls) => Some(create_tls_acceptor(&tls.cert_path, &tls.key_path)?),
            None => None,
        };

        let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
        info!(addr = %listener.local_addr()?, scheme, "listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let ctx = self.ctx.clone();
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_connection(ctx, tls_stream, remote_addr).await,
                        Err(err) => {
                            error!(%remote_addr, error = %err, "TLS handshake failed");
                        }
                    },
                    None => serve_connection(ctx, stream, remote_addr).await,
                }
            });
        }
    }
}

async fn serve_connection<S>(ctx: HandlerContext, stream: S, remote_addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let ctx = ctx.clone();
        async move { handle_request(&ctx, req, Some(remote_addr), None).await }
    });

    // with_upgrades keeps WebSocket passthrough working.
    if let Err(err) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        error!(%remote_addr, error = %err, "error serving connection");
    }
}

/// Start a health probe task for every forwarding endpoint that configures
/// one. The returned handles are observability accessors.
pub fn spawn_health_probes(state: &Arc<EngineState>, client: &HttpClient) -> Vec<Arc<BackendHealth>> {
    let config = state.config();
    config
        .endpoints
        .iter()
        .filter_map(|endpoint| {
            let forward = endpoint.forward.as_ref()?;
            let health_check = forward.health_check.clone()?;
            Some(spawn_probe(
                client.clone(),
                forward.backend_url.clone(),
                health_check,
            ))
        })
        .collect()
}
