use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
};

use dashmap::{
    DashMap,
    mapref::entry::Entry,
};
use tokio::sync::Notify;

use crate::remote::PendingIncrement;

// Last value read from the remote store, valid until `expire_at` (epoch secs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub value: i64,
    pub expire_at: i64,
}

// Increments not yet flushed, with the absolute expiry to apply if the
// flush creates the remote key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta {
    pub amount: i64,
    pub expire_at: i64,
}

// Process-local view of the remote counters in batched mode.
#[derive(Debug, Default)]
pub struct SyncState {
    pending: DashMap<String, Delta>,
    usage: DashMap<String, Snapshot>,
    last_sync_ms: AtomicI64,
    flushing: AtomicBool,
    flush_done: Notify,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    // Adds to the key's pending delta. A new delta takes its expiry from
    // the cached snapshot when there is one, otherwise from `expire_at`.
    pub fn add_delta(&self, key: &str, amount: i64, expire_at: i64) {
        let expire_at = self
            .usage
            .get(key)
            .map(|snapshot| snapshot.expire_at)
            .unwrap_or(expire_at);

        self.pending
            .entry(key.to_string())
            .and_modify(|delta| delta.amount = delta.amount.saturating_add(amount))
            .or_insert(Delta { amount, expire_at });
    }

    // `snapshot + delta` while the snapshot is live. An expired snapshot
    // restarts the key at zero with a window ending at `fresh_expire_at`.
    // `None` when nothing is cached for the key.
    pub fn cached_usage(&self, key: &str, now_secs: i64, fresh_expire_at: i64) -> Option<i64> {
        let snapshot = *self.usage.get(key)?;
        if snapshot.expire_at > now_secs {
            let delta = self.pending.get(key).map(|d| d.amount).unwrap_or(0);
            return Some(snapshot.value.saturating_add(delta));
        }

        self.usage.insert(
            key.to_string(),
            Snapshot {
                value: 0,
                expire_at: fresh_expire_at,
            },
        );
        self.pending.remove(key);
        Some(0)
    }

    // Caches a value fetched from the remote store and drops the key's delta.
    pub fn seed(&self, key: &str, value: i64, expire_at: i64) {
        self.usage
            .insert(key.to_string(), Snapshot { value, expire_at });
        self.pending.remove(key);
    }

    pub fn is_due(&self, now_ms: i64, rate_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_sync_ms()) >= rate_ms
    }

    pub fn last_sync_ms(&self) -> i64 {
        self.last_sync_ms.load(Ordering::Acquire)
    }

    // Wall-clock milliseconds, never a request timestamp.
    pub fn mark_synced(&self, now_ms: i64) {
        self.last_sync_ms.store(now_ms, Ordering::Release);
    }

    // Claims the single flush slot; false if a flush is already running.
    pub fn try_begin_flush(&self) -> bool {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // Waits for any in-flight flush to finish, then claims the slot.
    pub async fn begin_flush(&self) {
        loop {
            let done = self.flush_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();
            if self.try_begin_flush() {
                return;
            }
            done.await;
        }
    }

    pub fn finish_flush(&self) {
        self.flushing.store(false, Ordering::Release);
        self.flush_done.notify_waiters();
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub fn pending_increments(&self) -> Vec<PendingIncrement> {
        self.pending
            .iter()
            .filter(|entry| entry.amount != 0)
            .map(|entry| PendingIncrement {
                key: entry.key().clone(),
                amount: entry.amount,
                expire_at: entry.expire_at,
            })
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|entry| entry.amount != 0)
    }

    // Applies a successful flush: removes what was sent (keeping anything
    // added meanwhile), drops every snapshot and advances the sync instant.
    pub fn complete_flush(&self, flushed: &[PendingIncrement], now_ms: i64) {
        for inc in flushed {
            if let Entry::Occupied(mut entry) = self.pending.entry(inc.key.clone()) {
                let remaining = entry.get().amount.saturating_sub(inc.amount);
                if remaining > 0 {
                    entry.get_mut().amount = remaining;
                } else {
                    entry.remove();
                }
            }
        }
        self.usage.clear();
        self.mark_synced(now_ms);
    }

    pub fn delta(&self, key: &str) -> Option<Delta> {
        self.pending.get(key).map(|d| *d)
    }

    pub fn snapshot(&self, key: &str) -> Option<Snapshot> {
        self.usage.get(key).map(|s| *s)
    }

    pub fn pending_view(&self) -> BTreeMap<String, Delta> {
        self.pending
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn usage_view(&self) -> BTreeMap<String, Snapshot> {
        self.usage
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
