//! Tunneling primitives: sniffed-byte replay and the transparent pipe.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// A stream that replays already-consumed bytes before reading from the
/// inner stream. Domain sniffing consumes the first client bytes; wrapping
/// the connection in this makes them visible again to whatever serves the
/// tunnel (hyper, a TLS acceptor, or the raw pipe).
pub struct PrefixedStream<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.offset < self.prefix.len() {
            let remaining = &self.prefix[self.offset..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Dumb-proxy both directions until either side closes.
pub async fn pipe<A, B>(mut client: A, mut upstream: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((tx, rx)) => debug!(tx, rx, "tunnel closed"),
        Err(e) => debug!(error = %e, "tunnel ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn replays_prefix_then_inner() {
        let (mut near, far) = tokio::io::duplex(64);
        near.write_all(b" world").await.unwrap();
        near.shutdown().await.unwrap();

        let mut stream = PrefixedStream::new(b"hello".to_vec(), far);
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn small_reads_drain_prefix_incrementally() {
        let (near, far) = tokio::io::duplex(64);
        drop(near);

        let mut stream = PrefixedStream::new(b"abcdef".to_vec(), far);
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (mut near, far) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(b"ignored-prefix".to_vec(), far);
        stream.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        near.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn pipe_copies_both_directions() {
        let (client_near, client_far) = tokio::io::duplex(64);
        let (upstream_near, upstream_far) = tokio::io::duplex(64);

        let task = tokio::spawn(pipe(client_far, upstream_far));

        let (mut client, mut upstream) = (client_near, upstream_near);
        client.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");

        upstream.write_all(b"response").await.unwrap();
        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response");

        drop(client);
        drop(upstream);
        task.await.unwrap();
    }
}
