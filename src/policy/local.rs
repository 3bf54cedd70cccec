use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::{
    error::{CounterError, CounterResult},
    period::{Limits, Period},
    policy::CounterPolicy,
    scope::{Scope, cache_key},
};

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    value: i64,
    expires_at_ms: i64,
}

pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
    max_entries: usize,
}

impl LocalStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn incr(
        &self,
        key: &str,
        value: i64,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> CounterResult<i64> {
        let now_ms = now.timestamp_millis();
        let fresh = LocalEntry {
            value: 0,
            expires_at_ms: now_ms + ttl_secs * 1_000,
        };

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.purge_expired(now);
            if self.entries.len() >= self.max_entries {
                return Err(CounterError::LocalStore("no memory".to_string()));
            }
        }

        let mut entry = self.entries.entry(key.to_string()).or_insert(fresh);
        if entry.expires_at_ms <= now_ms {
            *entry = fresh;
        }
        entry.value = entry.value.saturating_add(value);
        Ok(entry.value)
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<i64> {
        let now_ms = now.timestamp_millis();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map(|entry| entry.value)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at_ms > now_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct LocalPolicy {
    store: Arc<LocalStore>,
}

impl LocalPolicy {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CounterPolicy for LocalPolicy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn increment(
        &self,
        scope: &Scope,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        value: i64,
    ) -> CounterResult<()> {
        for period in limits.enabled() {
            let key = cache_key(scope, identifier, period, period.bucket_label(now));
            if let Err(err) = self
                .store
                .incr(&key, value, period.expiration_secs(), now)
            {
                tracing::error!(key = %key, period = %period, error = %err, "could not increment local counter");
                return Err(err);
            }
        }
        Ok(())
    }

    async fn usage(
        &self,
        scope: &Scope,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> CounterResult<i64> {
        let key = cache_key(scope, identifier, period, period.bucket_label(now));
        Ok(self.store.get(&key, now).unwrap_or(0).max(0))
    }
}
