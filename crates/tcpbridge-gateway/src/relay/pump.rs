use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use tcpbridge_core::error::{BridgeError, Result};
use tcpbridge_core::protocol::RelayEvent;

use super::EventSink;
use crate::remote::RemoteStream;

pub(crate) type Reader = ReadHalf<RemoteStream>;

/// Counts live read pumps of one session and remembers the peak.
#[derive(Debug, Default)]
pub struct PumpGauge {
    live: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicU64,
}

impl PumpGauge {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of pumps ever alive at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> PumpGuard {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        PumpGuard(Arc::clone(self))
    }
}

struct PumpGuard(Arc<PumpGauge>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to the single read pump of a transport generation.
///
/// The pump task owns the read half. [`ReadPump::stop`] is the only way to get
/// it back, and it only returns once the task has finished. Dropping the
/// handle cancels the task without waiting.
pub(crate) struct ReadPump {
    cancel: DropGuard,
    task: JoinHandle<Reader>,
}

impl ReadPump {
    pub(crate) fn spawn(
        reader: Reader,
        generation: u64,
        events: EventSink,
        buf_size: usize,
        gauge: &Arc<PumpGauge>,
    ) -> Self {
        let cancel = CancellationToken::new();
        // Count the pump before the task is scheduled so the gauge never
        // under-reports.
        let guard = gauge.enter();
        let task = tokio::spawn(run(reader, generation, events, buf_size, cancel.clone(), guard));
        Self { cancel: cancel.drop_guard(), task }
    }

    /// Cancel the pump and wait for it to hand back the read half.
    pub(crate) async fn stop(self) -> Result<Reader> {
        let ReadPump { cancel, task } = self;
        drop(cancel);
        task.await
            .map_err(|e| BridgeError::Internal(format!("read pump join failed: {e}")))
    }
}

async fn run(
    mut reader: Reader,
    generation: u64,
    events: EventSink,
    buf_size: usize,
    cancel: CancellationToken,
    _guard: PumpGuard,
) -> Reader {
    let mut buf = vec![0u8; buf_size];
    tracing::debug!(generation, "read pump started");

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(generation, "read pump cancelled");
                break;
            }
            r = reader.read(&mut buf) => r,
        };

        match read {
            Ok(0) => {
                tracing::debug!(generation, "remote closed");
                events.emit(RelayEvent::Closed).await;
                break;
            }
            Ok(n) => {
                if !events.emit(RelayEvent::Data(Bytes::copy_from_slice(&buf[..n]))).await {
                    tracing::debug!(generation, "client gone; read pump exiting");
                    break;
                }
            }
            // rustls reports a peer that closes without close_notify this way.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(generation, error = %e, "remote closed without close_notify");
                events.emit(RelayEvent::Closed).await;
                break;
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "remote read failed");
                events.emit(RelayEvent::error(format!("TCP Read Error: {e}"))).await;
                break;
            }
        }
    }

    reader
}
