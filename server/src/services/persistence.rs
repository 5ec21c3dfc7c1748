//! Store worker: background writer for event-log appends and presence.
//!
//! DESIGN
//! ======
//! Relay and presence code never await the room store. They enqueue a
//! `StoreOp` with `try_send` on a bounded queue, and a single consumer task
//! applies ops strictly in submission order. A `Flush` op is a barrier: its
//! acknowledgement is sent only after every op queued before it has been
//! applied, which is what shutdown and tests wait on.
//!
//! ERROR HANDLING
//! ==============
//! Writes are best-effort. Retryable failures are retried with linear
//! back-off; a write that still fails is logged and dropped. A full or
//! closed queue drops the op with a warning. Nothing here can fail the
//! in-memory operation that produced the op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use whiteboard_frames::{DrawingRecord, RoomId};

use crate::config::Config;
use crate::error::ErrorCode;
use crate::services::store::{EVENT_LOG_CAP, PresenceEntry, RoomStore, StoreError};
use crate::state::AppState;

/// One queued store write.
#[derive(Debug)]
pub enum StoreOp {
    AppendEvent { room_id: RoomId, record: DrawingRecord },
    SetPresence { room_id: RoomId, users: Vec<PresenceEntry> },
    /// Acknowledged once every earlier op has been applied.
    Flush(oneshot::Sender<()>),
}

impl StoreOp {
    fn label(&self) -> &'static str {
        match self {
            Self::AppendEvent { .. } => "append_event",
            Self::SetPresence { .. } => "set_presence",
            Self::Flush(_) => "flush",
        }
    }

    fn room_id(&self) -> Option<&str> {
        match self {
            Self::AppendEvent { room_id, .. } | Self::SetPresence { room_id, .. } => Some(room_id),
            Self::Flush(_) => None,
        }
    }
}

/// Tuning knobs for the store worker.
#[derive(Debug, Clone, Copy)]
pub struct StoreWorkerConfig {
    pub queue_capacity: usize,
    pub retries: usize,
    pub retry_base_ms: u64,
}

impl From<&Config> for StoreWorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.store_queue_capacity,
            retries: config.store_retries,
            retry_base_ms: config.store_retry_base_ms,
        }
    }
}

/// Spawn the store worker and return its queue sender and task handle.
///
/// The task exits once every sender has been dropped and the queue drained.
#[must_use]
pub fn spawn_store_worker(store: Arc<dyn RoomStore>, config: StoreWorkerConfig) -> (mpsc::Sender<StoreOp>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<StoreOp>(config.queue_capacity.max(1));

    info!(
        queue_capacity = config.queue_capacity,
        retries = config.retries,
        retry_base_ms = config.retry_base_ms,
        "store worker configured"
    );

    let handle = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            apply_op(store.as_ref(), op, config).await;
        }
        debug!("store worker stopped");
    });

    (tx, handle)
}

/// Best-effort, non-blocking enqueue.
pub fn enqueue(state: &AppState, op: StoreOp) {
    let Some(tx) = &state.store_tx else {
        debug!(op = op.label(), room_id = op.room_id(), "store worker disabled; dropping op");
        return;
    };

    match tx.try_send(op) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(op)) => {
            warn!(op = op.label(), room_id = op.room_id(), "store queue full; dropping op");
        }
        Err(mpsc::error::TrySendError::Closed(op)) => {
            warn!(op = op.label(), room_id = op.room_id(), "store queue closed; dropping op");
        }
    }
}

/// Wait until every op queued before this call has been applied.
/// Returns false if the worker is gone.
pub async fn flush(tx: &mpsc::Sender<StoreOp>) -> bool {
    let (ack_tx, ack_rx) = oneshot::channel();
    if tx.send(StoreOp::Flush(ack_tx)).await.is_err() {
        return false;
    }
    ack_rx.await.is_ok()
}

async fn apply_op(store: &dyn RoomStore, op: StoreOp, config: StoreWorkerConfig) {
    let label = op.label();
    let (room_id, result) = match op {
        StoreOp::Flush(ack) => {
            if ack.send(()).is_err() {
                debug!("store flush requester went away");
            }
            return;
        }
        StoreOp::AppendEvent { room_id, record } => {
            let (room, record) = (room_id.as_str(), &record);
            let result = with_retry(config, label, room, move || async move {
                store.append_event(room, record, EVENT_LOG_CAP).await.map(|_| ())
            })
            .await;
            (room_id, result)
        }
        StoreOp::SetPresence { room_id, users } => {
            let (room, users) = (room_id.as_str(), users.as_slice());
            let result =
                with_retry(config, label, room, move || async move { store.set_presence(room, users).await }).await;
            (room_id, result)
        }
    };

    match result {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => {
            warn!(op = label, %room_id, "store write skipped: room not found");
        }
        Err(e) => {
            error!(op = label, %room_id, code = e.error_code(), error = %e, "store write failed; dropping op");
        }
    }
}

async fn with_retry<F, Fut>(config: StoreWorkerConfig, label: &str, room_id: &str, mut attempt_op: F) -> Result<(), StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StoreError>>,
{
    let attempts = config.retries.max(1);
    let mut attempt = 1;
    loop {
        match attempt_op().await {
            Ok(()) => return Ok(()),
            Err(e) if e.retryable() && attempt < attempts => {
                warn!(op = label, %room_id, error = %e, attempt, total = attempts, "store write failed; retrying");
                tokio::time::sleep(Duration::from_millis((attempt as u64) * config.retry_base_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
