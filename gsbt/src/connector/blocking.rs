//! Bridges the blocking FTP/SSH clients onto the async connector contract.
//!
//! Session handles live behind a `Mutex` and are only touched from tokio's
//! blocking pool. Downloads stream through a bounded channel so the async
//! side can write into its sink while the blocking side reads the socket.

use crate::utils::errors::{GsbtError, Result};
use bytes::Bytes;
use std::io::Read;
use std::sync::{Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHUNK_SIZE: usize = 64 * 1024;
const QUEUE_DEPTH: usize = 8;

pub(crate) fn lock<T>(session: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    session
        .lock()
        .map_err(|e| GsbtError::worker("session lock poisoned", e))
}

/// Run `work` on the blocking pool, giving up early if `cancel` fires.
pub(crate) async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        result = task => result?,
        _ = cancel.cancelled() => Err(GsbtError::Cancelled),
    }
}

/// Run `produce` on the blocking pool and copy every chunk it sends into
/// `sink`. Returns the number of bytes written.
pub(crate) async fn pump_into<F>(
    cancel: &CancellationToken,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    produce: F,
) -> Result<u64>
where
    F: FnOnce(mpsc::Sender<Bytes>) -> Result<()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(QUEUE_DEPTH);
    let producer = tokio::task::spawn_blocking(move || produce(tx));

    let mut written = 0u64;
    loop {
        let chunk = tokio::select! {
            chunk = rx.recv() => chunk,
            _ = cancel.cancelled() => return Err(GsbtError::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    producer.await??;
    sink.flush().await?;
    Ok(written)
}

/// Read `reader` to the end, sending fixed-size chunks down `tx`.
/// Fails with `Cancelled` once the receiving side has gone away.
pub(crate) fn forward_chunks<R: Read>(reader: &mut R, tx: &mpsc::Sender<Bytes>) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(GsbtError::Download(e.to_string())),
        };
        tx.blocking_send(Bytes::copy_from_slice(&buf[..n]))
            .map_err(|_| GsbtError::Cancelled)?;
    }
}

/// Buffer an upload source fully so it can be handed to a blocking client.
pub(crate) async fn drain_source(
    cancel: &CancellationToken,
    source: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    tokio::select! {
        read = source.read_to_end(&mut data) => { read?; }
        _ = cancel.cancelled() => return Err(GsbtError::Cancelled),
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_into_copies_all_chunks() {
        let cancel = CancellationToken::new();
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let mut sink = Vec::new();
        let written = pump_into(&cancel, &mut sink, move |tx| {
            forward_chunks(&mut std::io::Cursor::new(payload), &tx)
        })
        .await
        .unwrap();

        assert_eq!(written, expected.len() as u64);
        assert_eq!(sink, expected);
    }

    #[tokio::test]
    async fn test_pump_into_surfaces_producer_error() {
        let cancel = CancellationToken::new();
        let mut sink = Vec::new();
        let err = pump_into(&cancel, &mut sink, |_tx| {
            Err(GsbtError::Download("remote vanished".into()))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("remote vanished"));
    }

    #[tokio::test]
    async fn test_run_blocking_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_blocking(&cancel, || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(GsbtError::Cancelled)));
    }
}
