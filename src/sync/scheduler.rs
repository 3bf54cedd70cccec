use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{
    error::CounterResult,
    remote::RemoteStore,
    sync::state::SyncState,
};

#[derive(Debug, Clone, Copy)]
pub struct FlushJob {
    pub requested_at: DateTime<Utc>,
}

// Hands flush requests from the request path to a single background worker.
#[derive(Clone)]
pub struct SyncScheduler {
    sender: Sender<FlushJob>,
    state: Arc<SyncState>,
}

impl SyncScheduler {
    pub fn spawn(state: Arc<SyncState>, store: Arc<dyn RemoteStore>) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        tokio::spawn(sync_loop(receiver, state.clone(), store));
        Self { sender, state }
    }

    // Never blocks. Returns false when a flush is already outstanding.
    pub fn schedule(&self, requested_at: DateTime<Utc>) -> bool {
        if !self.state.try_begin_flush() {
            tracing::debug!("counter flush already in flight; skipping trigger");
            return false;
        }

        match self.sender.try_send(FlushJob { requested_at }) {
            Ok(()) => true,
            Err(err) => {
                self.state.finish_flush();
                tracing::warn!(error = %err, "failed to enqueue counter flush");
                false
            }
        }
    }
}

async fn sync_loop(
    mut receiver: Receiver<FlushJob>,
    state: Arc<SyncState>,
    store: Arc<dyn RemoteStore>,
) {
    while let Some(job) = receiver.recv().await {
        tracing::debug!(requested_at = %job.requested_at, "running scheduled counter flush");
        let _ = flush(&state, store.as_ref()).await;
        state.finish_flush();
    }

    if state.has_pending() {
        state.begin_flush().await;
        let _ = flush(&state, store.as_ref()).await;
        state.finish_flush();
    }
    tracing::info!("sync channel closed, scheduler exiting");
}

// State is only touched after the store accepted the batch. The sync
// instant is taken from the wall clock once the batch is written.
pub async fn flush(state: &SyncState, store: &dyn RemoteStore) -> CounterResult<usize> {
    let batch = state.pending_increments();

    if let Err(err) = store.flush(&batch).await {
        tracing::error!(
            keys = batch.len(),
            error = %err,
            "counter flush failed; pending deltas kept for the next attempt"
        );
        return Err(err);
    }

    state.complete_flush(&batch, Utc::now().timestamp_millis());
    tracing::debug!(keys = batch.len(), "flushed pending counter deltas");
    Ok(batch.len())
}
