//! SOCKS5 domain-interception overlay proxy.
//!
//! Per accepted connection: handshake → optional auth → CONNECT → tunnel.
//! After the success reply, the first client bytes are sniffed for the
//! effective domain (TLS SNI or HTTP Host). Non-intercepted domains become a
//! transparent byte-pipe to the real destination; intercepted domains are
//! served as HTTP/1.1 through the same endpoint matcher as the plain
//! listener, with overlay mode forwarding unmatched requests to the real
//! resolved backend via the DNS cache.
//!
//! Every connection is an independent task; one tunnel's failure affects
//! nothing else.

mod dns;
mod handshake;
mod sniff;
mod tunnel;

pub use dns::{DnsCache, DNS_TTL};
pub use handshake::{negotiate, write_reply, ConnectTarget};
pub use sniff::{is_tls_client_hello, parse_http_host, parse_sni};
pub use tunnel::{pipe, PrefixedStream};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::proxy::HttpClient;
use crate::server::{
    create_tls_acceptor, handle_request, HandlerContext, InterceptContext, OverlayTarget,
};
use crate::state::{DomainMatch, EngineState};

const SNIFF_BUFFER: usize = 8192;

pub struct SocksServer {
    ctx: HandlerContext,
    dns: Arc<DnsCache>,
}

impl SocksServer {
    pub fn new(state: Arc<EngineState>, client: HttpClient) -> Self {
        Self {
            ctx: HandlerContext { state, client },
            dns: Arc::new(DnsCache::new()),
        }
    }

    /// The overlay DNS cache; embedders can seed or inspect entries.
    pub fn dns(&self) -> Arc<DnsCache> {
        Arc::clone(&self.dns)
    }

    /// Bind the configured address and serve until the task is cancelled.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config = self.ctx.state.config();
        let socks = config
            .socks
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SOCKS listener is not configured"))?;
        let listener = TcpListener::bind(socks.listen.as_str()).await?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener (lets tests use ephemeral ports).
    pub async fn run_on(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let config = self.ctx.state.config();
        let socks = config
            .socks
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SOCKS listener is not configured"))?;

        // Interception certs are externally generated; without them,
        // intercepted TLS domains degrade to a transparent pipe.
        let tls_acceptor = match &socks.tls {
            Some(tls) => Some(create_tls_acceptor(&tls.cert_path, &tls.key_path)?),
            None => None,
        };

        info!(addr = %listener.local_addr()?, domains = socks.domains.len(), "SOCKS5 listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let ctx = self.ctx.clone();
            let dns = Arc::clone(&self.dns);
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(ctx, dns, tls_acceptor, stream, peer).await {
                    // Probes commonly disconnect right after the greeting.
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        debug!(%peer, "client closed during handshake");
                    } else {
                        debug!(%peer, error = %e, "socks session error");
                    }
                }
            });
        }
    }
}

async fn handle_connection(
    ctx: HandlerContext,
    dns: Arc<DnsCache>,
    tls_acceptor: Option<TlsAcceptor>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    let config = ctx.state.config();
    let auth = config.socks.as_ref().and_then(|s| s.auth.as_ref());

    let target = negotiate(&mut stream, auth).await?;

    // The success reply is already written; the first client bytes identify
    // the effective domain.
    let mut buf = vec![0u8; SNIFF_BUFFER];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    buf.truncate(n);

    let is_tls = is_tls_client_hello(&buf);
    let sniffed = if is_tls {
        parse_sni(&buf)
    } else {
        parse_http_host(&buf)
    };
    let domain = sniffed.or_else(|| target.domain().map(str::to_string));

    let matched = domain
        .as_deref()
        .and_then(|d| ctx.state.match_domain(d));

    let (Some(domain), Some(domain_match)) = (domain, matched) else {
        // Not intercepted: dumb proxy, no HTTP parsing attempted.
        return pipe_to_target(buf, stream, &target).await;
    };

    debug!(%domain, tls = is_tls, overlay = domain_match.overlay_mode, "intercepting");

    if is_tls {
        let Some(acceptor) = tls_acceptor else {
            debug!(%domain, "no interception certs configured; piping TLS transparently");
            return pipe_to_target(buf, stream, &target).await;
        };
        let prefixed = PrefixedStream::new(buf, stream);
        let tls_stream = acceptor
            .accept(prefixed)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        serve_intercepted(ctx, dns, tls_stream, domain, domain_match, target.port(), true, peer)
            .await;
    } else {
        let prefixed = PrefixedStream::new(buf, stream);
        serve_intercepted(ctx, dns, prefixed, domain, domain_match, target.port(), false, peer)
            .await;
    }
    Ok(())
}

/// Transparent byte-pipe to the real destination, replaying the sniffed
/// bytes first.
async fn pipe_to_target(
    buf: Vec<u8>,
    client: TcpStream,
    target: &ConnectTarget,
) -> io::Result<()> {
    match TcpStream::connect(target.connect_addr()).await {
        Ok(mut upstream) => {
            upstream.write_all(&buf).await?;
            pipe(client, upstream).await;
            Ok(())
        }
        Err(e) => {
            debug!(target = %target.connect_addr(), error = %e, "transparent connect failed");
            Ok(())
        }
    }
}

/// Serve an intercepted tunnel as HTTP/1.1 through the shared handler.
#[allow(clippy::too_many_arguments)]
async fn serve_intercepted<S>(
    ctx: HandlerContext,
    dns: Arc<DnsCache>,
    io: S,
    domain: String,
    domain_match: DomainMatch,
    port: u16,
    tls: bool,
    peer: SocketAddr,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Resolution is deferred to miss time; the handler consults the shared
    // DNS cache only when a request matches no rule.
    let overlay = domain_match
        .overlay_mode
        .then(|| OverlayTarget { dns, port, tls });

    let intercept = InterceptContext { domain, overlay };
    let service = service_fn(move |req| {
        let ctx = ctx.clone();
        let intercept = intercept.clone();
        async move { handle_request(&ctx, req, Some(peer), Some(intercept)).await }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
    {
        debug!(%peer, error = %err, "intercepted connection ended");
    }
}
