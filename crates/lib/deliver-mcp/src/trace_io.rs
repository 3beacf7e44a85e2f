//! Byte-level tracing wrappers for the stdio transport.
//!
//! Every frame read from or written to the wrapped stream is mirrored to the
//! `docker_deliver::wire` trace target, which stays silent unless that target
//! is enabled. Inbound traffic is prefixed `<-`, outbound `->`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

const WIRE_TARGET: &str = "docker_deliver::wire";

pub struct TracedReader<R> {
    inner: R,
}

impl<R> TracedReader<R> {
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TracedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let bytes = &buf.filled()[before..];
            if !bytes.is_empty() {
                trace!(target: WIRE_TARGET, "<- {}", String::from_utf8_lossy(bytes).trim_end());
            }
        }
        poll
    }
}

pub struct TracedWriter<W> {
    inner: W,
}

impl<W> TracedWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for TracedWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll
            && *written > 0
        {
            trace!(
                target: WIRE_TARGET,
                "-> {}",
                String::from_utf8_lossy(&buf[..*written]).trim_end()
            );
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
