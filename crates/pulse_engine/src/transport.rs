use std::sync::Arc;

use pulse_core::{JobId, Msg};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::TransportError;

/// One raw snapshot handed from a transport to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub job_id: JobId,
    pub epoch: u64,
    pub seq: Option<u64>,
    pub payload: Value,
}

/// Receiver of whatever a transport produces for one subscription.
pub trait SnapshotSink: Send + Sync {
    fn snapshot(&self, delivery: Delivery);
    fn transport_error(&self, job_id: &JobId, epoch: u64, error: TransportError);
}

/// Sink that forwards into the tracker's message channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Msg>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self { tx }
    }
}

impl SnapshotSink for ChannelSink {
    fn snapshot(&self, delivery: Delivery) {
        let _ = self.tx.send(Msg::Snapshot {
            job_id: delivery.job_id,
            epoch: delivery.epoch,
            seq: delivery.seq,
            payload: delivery.payload,
        });
    }

    fn transport_error(&self, job_id: &JobId, epoch: u64, error: TransportError) {
        let _ = self.tx.send(Msg::TransportFailed {
            job_id: job_id.clone(),
            epoch,
            reason: error.to_string(),
        });
    }
}

/// Wraps a sink so nothing gets through once the subscription is stopped.
pub(crate) struct GuardedSink {
    inner: Arc<dyn SnapshotSink>,
    token: CancellationToken,
}

impl GuardedSink {
    pub(crate) fn new(inner: Arc<dyn SnapshotSink>, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl SnapshotSink for GuardedSink {
    fn snapshot(&self, delivery: Delivery) {
        if !self.is_stopped() {
            self.inner.snapshot(delivery);
        }
    }

    fn transport_error(&self, job_id: &JobId, epoch: u64, error: TransportError) {
        if !self.is_stopped() {
            self.inner.transport_error(job_id, epoch, error);
        }
    }
}

/// Delivers snapshots for one job until stopped.
///
/// `start` must be called from within a tokio runtime.
pub trait Transport: Send + Sync {
    fn start(&self, job_id: &JobId, epoch: u64, sink: Arc<dyn SnapshotSink>) -> TransportHandle;
}

/// Live subscription. Stopping is synchronous, idempotent, and also happens on drop.
pub struct TransportHandle {
    token: CancellationToken,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl TransportHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            on_stop: None,
        }
    }

    /// Runs `on_stop` once, right after the token is cancelled.
    pub fn with_cleanup(token: CancellationToken, on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            token,
            on_stop: Some(Box::new(on_stop)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(cleanup) = self.on_stop.take() {
            cleanup();
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
