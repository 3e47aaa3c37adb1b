//! Process-wide bandwidth limiting.
//!
//! One limiter per direction is shared by every limited connection. Reads
//! and writes are charged after they happen: the next operation on the
//! same stream waits until the limiter has room for the bytes just moved.
//! A single operation never moves more than one second's worth of bytes.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::io;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

type Pending = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A shared byte-rate limiter for one direction.
#[derive(Clone)]
struct Limiter {
    inner: Arc<DefaultDirectRateLimiter>,
    burst: usize,
}

impl Limiter {
    fn from_kbps(kbps: u32) -> Option<Self> {
        let bytes_per_sec = NonZeroU32::new(kbps.saturating_mul(1024))?;
        Some(Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(bytes_per_sec))),
            burst: bytes_per_sec.get() as usize,
        })
    }

    /// A future that completes once `bytes` have been paid for.
    fn charge(&self, bytes: usize) -> Option<Pending> {
        let n = NonZeroU32::new(u32::try_from(bytes).ok()?)?;
        let limiter = Arc::clone(&self.inner);
        Some(Box::pin(async move {
            // n never exceeds the burst size, so this cannot fail.
            let _ = limiter.until_n_ready(n).await;
        }))
    }
}

/// Upload and download limits shared by all limited connections.
#[derive(Clone, Default)]
pub struct Bandwidth {
    recv: Option<Limiter>,
    send: Option<Limiter>,
}

impl std::fmt::Debug for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bandwidth")
            .field("recv_bytes_per_sec", &self.recv.as_ref().map(|l| l.burst))
            .field("send_bytes_per_sec", &self.send.as_ref().map(|l| l.burst))
            .finish()
    }
}

impl Bandwidth {
    /// Limits in KiB/s; zero means unlimited.
    pub fn new(max_recv_kbps: u32, max_send_kbps: u32) -> Self {
        Self {
            recv: Limiter::from_kbps(max_recv_kbps),
            send: Limiter::from_kbps(max_send_kbps),
        }
    }

    /// No limits in either direction.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Wrap a reader, or pass it through when `limit` is false or no
    /// receive limit is configured.
    pub fn wrap_reader<R>(&self, reader: R, limit: bool) -> Box<dyn AsyncRead + Send + Unpin>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        match (&self.recv, limit) {
            (Some(limiter), true) => Box::new(LimitedReader::new(reader, limiter.clone())),
            _ => Box::new(reader),
        }
    }

    /// Wrap a writer, or pass it through when `limit` is false or no send
    /// limit is configured.
    pub fn wrap_writer<W>(&self, writer: W, limit: bool) -> Box<dyn AsyncWrite + Send + Unpin>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        match (&self.send, limit) {
            (Some(limiter), true) => Box::new(LimitedWriter::new(writer, limiter.clone())),
            _ => Box::new(writer),
        }
    }
}

/// A reader that pays for every read through the shared receive limiter.
pub struct LimitedReader<R> {
    inner: R,
    limiter: Limiter,
    scratch: Vec<u8>,
    pending: Option<Pending>,
}

impl<R> LimitedReader<R> {
    fn new(inner: R, limiter: Limiter) -> Self {
        Self {
            inner,
            limiter,
            scratch: Vec::new(),
            pending: None,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(pending) = this.pending.as_mut() {
            ready!(pending.as_mut().poll(cx));
            this.pending = None;
        }

        let max = buf.remaining().min(this.limiter.burst);
        if max == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.scratch.len() < max {
            this.scratch.resize(max, 0);
        }

        let mut chunk = ReadBuf::new(&mut this.scratch[..max]);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;
        let n = chunk.filled().len();
        buf.put_slice(chunk.filled());

        this.pending = this.limiter.charge(n);
        Poll::Ready(Ok(()))
    }
}

/// A writer that pays for every write through the shared send limiter.
pub struct LimitedWriter<W> {
    inner: W,
    limiter: Limiter,
    pending: Option<Pending>,
}

impl<W> LimitedWriter<W> {
    fn new(inner: W, limiter: Limiter) -> Self {
        Self {
            inner,
            limiter,
            pending: None,
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for LimitedWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if let Some(pending) = this.pending.as_mut() {
            ready!(pending.as_mut().poll(cx));
            this.pending = None;
        }

        let max = buf.len().min(this.limiter.burst);
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &buf[..max]))?;
        this.pending = this.limiter.charge(n);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
