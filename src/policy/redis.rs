use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::RedisConfig,
    error::CounterResult,
    period::{Limits, Period},
    policy::CounterPolicy,
    remote::{PendingIncrement, RedisStore, RemoteStore, pool::RedisPools},
    scope::{Scope, cache_key},
    sync::{self, SyncScheduler, SyncState},
};

enum SyncMode {
    Realtime,
    // Increments accumulate locally and are flushed every `rate_ms`.
    Batched {
        rate_ms: i64,
        state: Arc<SyncState>,
        scheduler: SyncScheduler,
    },
}

pub struct RedisPolicy {
    store: Arc<dyn RemoteStore>,
    mode: SyncMode,
}

impl RedisPolicy {
    // `sync_rate` is in seconds; zero or less selects synchronous writes.
    pub fn new(store: Arc<dyn RemoteStore>, sync_rate: f64) -> Self {
        let mode = if sync_rate > 0.0 {
            let state = Arc::new(SyncState::new());
            let scheduler = SyncScheduler::spawn(state.clone(), store.clone());
            SyncMode::Batched {
                rate_ms: ((sync_rate * 1_000.0).round() as i64).max(1),
                state,
                scheduler,
            }
        } else {
            SyncMode::Realtime
        };
        Self { store, mode }
    }

    pub fn connect(pools: Arc<RedisPools>, config: &RedisConfig) -> Self {
        pools.spawn_reaper(config.settings.keepalive_idle);
        let store = Arc::new(RedisStore::new(pools, config.settings.clone()));
        Self::new(store, config.sync_rate)
    }

    pub fn is_batched(&self) -> bool {
        matches!(self.mode, SyncMode::Batched { .. })
    }

    pub fn sync_state(&self) -> Option<&Arc<SyncState>> {
        match &self.mode {
            SyncMode::Batched { state, .. } => Some(state),
            SyncMode::Realtime => None,
        }
    }

    // Waits out a background flush that is already running, then flushes
    // whatever is still pending.
    pub async fn flush_now(&self) -> CounterResult<usize> {
        let Some(state) = self.sync_state() else {
            return Ok(0);
        };
        if state.is_flushing() {
            tracing::debug!("counter flush in flight; waiting before manual flush");
        }
        state.begin_flush().await;
        let result = sync::flush(state, self.store.as_ref()).await;
        state.finish_flush();
        result
    }
}

#[async_trait]
impl CounterPolicy for RedisPolicy {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment(
        &self,
        scope: &Scope,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        value: i64,
    ) -> CounterResult<()> {
        let now_secs = now.timestamp();
        let increments: Vec<PendingIncrement> = limits
            .enabled()
            .map(|period| PendingIncrement {
                key: cache_key(scope, identifier, period, period.bucket_label(now)),
                amount: value,
                expire_at: now_secs + period.expiration_secs(),
            })
            .collect();

        match &self.mode {
            SyncMode::Realtime => self.store.increment(&increments).await,
            SyncMode::Batched {
                rate_ms,
                state,
                scheduler,
            } => {
                for inc in &increments {
                    state.add_delta(&inc.key, inc.amount, inc.expire_at);
                }
                let wall = Utc::now();
                if state.is_due(wall.timestamp_millis(), *rate_ms) {
                    scheduler.schedule(wall);
                }
                Ok(())
            }
        }
    }

    async fn usage(
        &self,
        scope: &Scope,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> CounterResult<i64> {
        let key = cache_key(scope, identifier, period, period.bucket_label(now));
        let now_secs = now.timestamp();
        let expire_at = now_secs + period.expiration_secs();

        if let Some(value) = self
            .sync_state()
            .and_then(|state| state.cached_usage(&key, now_secs, expire_at))
        {
            return Ok(value.max(0));
        }

        let value = self.store.get(&key).await?.unwrap_or(0).max(0);
        if let Some(state) = self.sync_state() {
            state.seed(&key, value, expire_at);
        }
        Ok(value)
    }

    async fn shutdown(&self) -> CounterResult<()> {
        self.flush_now().await.map(|_| ())
    }
}
