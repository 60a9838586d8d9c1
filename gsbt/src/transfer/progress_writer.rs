//! Byte-counting writer wrapper for real-time download progress.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::time::{Duration, Instant};

/// Callback for progress updates, receives the cumulative byte count
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Writer wrapper that counts bytes written and calls a progress callback
pub struct ProgressWriter<W> {
    inner: W,
    bytes_written: u64,
    last_update: Option<Instant>,
    update_interval: Duration,
    callback: ProgressCallback,
}

impl<W: AsyncWrite + Unpin> ProgressWriter<W> {
    pub fn new(inner: W, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_written: 0,
            last_update: None,
            update_interval: Duration::from_millis(100),
            callback,
        }
    }

    /// Minimum spacing between callbacks. Zero reports every write.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn report(&mut self, force: bool) {
        let now = Instant::now();
        let due = match self.last_update {
            None => true,
            Some(last) => now.duration_since(last) >= self.update_interval,
        };
        if force || due {
            (self.callback)(self.bytes_written);
            self.last_update = Some(now);
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match Pin::new(&mut self.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                self.bytes_written += n as u64;
                if n > 0 {
                    self.report(false);
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::new(&mut self.inner).poll_flush(cx) {
            Poll::Ready(Ok(())) => {
                // Final count always reaches the callback.
                self.report(true);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
