pub mod pool;
pub mod script;

use std::{
    future::Future,
    sync::Arc,
};

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::{
    config::RedisSettings,
    error::{CounterError, CounterResult},
    remote::pool::RedisPools,
};

// One increment destined for the remote store. `expire_at` is absolute
// epoch seconds and only applies if the key does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIncrement {
    pub key: String,
    pub amount: i64,
    pub expire_at: i64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> CounterResult<Option<i64>>;

    // Applies the increments one by one on a single connection and stops at
    // the first failure.
    async fn increment(&self, increments: &[PendingIncrement]) -> CounterResult<()>;

    // Applies the increments as one atomic pipeline in a single round trip.
    async fn flush(&self, increments: &[PendingIncrement]) -> CounterResult<()>;
}

pub struct RedisStore {
    pools: Arc<RedisPools>,
    settings: RedisSettings,
}

impl RedisStore {
    pub fn new(pools: Arc<RedisPools>, settings: RedisSettings) -> Self {
        Self { pools, settings }
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, fut: F) -> CounterResult<T>
    where
        F: Future<Output = CounterResult<T>>,
    {
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation, timeout_ms = timeout.as_millis() as u64, "redis operation timed out");
                Err(CounterError::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> CounterResult<Option<i64>> {
        self.with_timeout("get", async {
            let mut conn = self.pools.connection(&self.settings).await?;
            let value: Option<i64> = conn.get(key).await.map_err(|err| {
                tracing::error!(key, error = %err, "failed to read counter from redis");
                CounterError::from(err)
            })?;
            Ok(value)
        })
        .await
    }

    async fn increment(&self, increments: &[PendingIncrement]) -> CounterResult<()> {
        if increments.is_empty() {
            return Ok(());
        }

        self.with_timeout("increment", async {
            let mut conn = self.pools.connection(&self.settings).await?;
            let script = script::incr_expire_nx();
            for inc in increments {
                let _: i64 = script
                    .key(&inc.key)
                    .arg(inc.amount)
                    .arg(inc.expire_at)
                    .invoke_async(&mut *conn)
                    .await
                    .map_err(|err| {
                        tracing::error!(key = %inc.key, error = %err, "failed to increment counter in redis");
                        CounterError::from(err)
                    })?;
            }
            Ok(())
        })
        .await
    }

    async fn flush(&self, increments: &[PendingIncrement]) -> CounterResult<()> {
        if increments.is_empty() {
            return Ok(());
        }

        self.with_timeout("flush", async {
            let mut conn = self.pools.connection(&self.settings).await?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            for inc in increments {
                pipe.add_command(script::incr_expire_nx_eval(&inc.key, inc.amount, inc.expire_at))
                    .ignore();
            }
            let _: () = pipe.query_async(&mut *conn).await.map_err(|err| {
                tracing::error!(keys = increments.len(), error = %err, "redis flush pipeline failed");
                CounterError::from(err)
            })?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StoredCounter {
        pub value: i64,
        pub expire_at: i64,
    }

    #[derive(Default)]
    pub struct MemoryRemote {
        counters: Mutex<HashMap<String, StoredCounter>>,
        failing: AtomicBool,
        gets: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl MemoryRemote {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn stored(&self, key: &str) -> Option<StoredCounter> {
            self.counters.lock().unwrap().get(key).copied()
        }

        pub fn put(&self, key: &str, value: i64, expire_at: i64) {
            self.counters
                .lock()
                .unwrap()
                .insert(key.to_string(), StoredCounter { value, expire_at });
        }

        pub fn get_count(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub fn flush_count(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        fn check(&self) -> CounterResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(CounterError::Connection("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn apply(&self, increments: &[PendingIncrement]) {
            let mut counters = self.counters.lock().unwrap();
            for inc in increments {
                counters
                    .entry(inc.key.clone())
                    .and_modify(|c| c.value = c.value.saturating_add(inc.amount))
                    .or_insert(StoredCounter {
                        value: inc.amount,
                        expire_at: inc.expire_at,
                    });
            }
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryRemote {
        async fn get(&self, key: &str) -> CounterResult<Option<i64>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.stored(key).map(|c| c.value))
        }

        async fn increment(&self, increments: &[PendingIncrement]) -> CounterResult<()> {
            self.check()?;
            self.apply(increments);
            Ok(())
        }

        async fn flush(&self, increments: &[PendingIncrement]) -> CounterResult<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.apply(increments);
            Ok(())
        }
    }
}
