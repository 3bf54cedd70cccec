use std::{
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use deadpool_redis::{Connection, Manager, Pool, Runtime};
use redis::{ConnectionInfo, IntoConnectionInfo};

use crate::{
    config::RedisSettings,
    error::{CounterError, CounterResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub database: i64,
}

impl From<&RedisSettings> for PoolKey {
    fn from(settings: &RedisSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            database: settings.database,
        }
    }
}

#[derive(Default)]
pub struct RedisPools {
    pools: DashMap<PoolKey, Pool>,
}

impl RedisPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_for(&self, settings: &RedisSettings) -> CounterResult<Pool> {
        let key = PoolKey::from(settings);
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.clone());
        }

        let pool = build_pool(settings)?;
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            database = settings.database,
            max_size = settings.pool_size,
            "created redis connection pool"
        );
        Ok(self.pools.entry(key).or_insert(pool).clone())
    }

    // Checks out a connection. New connections authenticate and select the
    // database while connecting; recycled ones are handed back as-is.
    pub async fn connection(&self, settings: &RedisSettings) -> CounterResult<Connection> {
        let pool = self.pool_for(settings)?;
        pool.get().await.map_err(|err| {
            tracing::error!(
                host = %settings.host,
                port = settings.port,
                error = %err,
                "failed to check out redis connection"
            );
            CounterError::from(err)
        })
    }

    pub fn reap_idle(&self, idle: Duration) -> usize {
        let mut removed = 0;
        for entry in self.pools.iter() {
            let result = entry.value().retain(|_, metrics| metrics.last_used() < idle);
            removed += result.removed.len();
        }
        removed
    }

    pub fn spawn_reaper(self: &Arc<Self>, idle: Duration) {
        if idle.is_zero() {
            return;
        }
        let pools = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pools) = pools.upgrade() else {
                    break;
                };
                let removed = pools.reap_idle(idle);
                if removed > 0 {
                    tracing::debug!(removed, "closed idle redis connections");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

fn build_pool(settings: &RedisSettings) -> CounterResult<Pool> {
    let manager = Manager::new(connection_info(settings)?)
        .map_err(|e| CounterError::Connection(e.to_string()))?;

    Pool::builder(manager)
        .max_size(settings.pool_size)
        .wait_timeout(Some(settings.timeout))
        .create_timeout(Some(settings.timeout))
        .recycle_timeout(Some(settings.timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| CounterError::Connection(format!("failed to build redis pool: {e}")))
}

pub fn connection_info(settings: &RedisSettings) -> CounterResult<ConnectionInfo> {
    let scheme = if settings.ssl { "rediss" } else { "redis" };
    let insecure = if settings.ssl && !settings.ssl_verify {
        "#insecure"
    } else {
        ""
    };
    let url = format!(
        "{scheme}://{}:{}/{}{insecure}",
        settings.host, settings.port, settings.database
    );

    let mut info = url
        .as_str()
        .into_connection_info()
        .map_err(|e| CounterError::Connection(format!("invalid redis address {url}: {e}")))?;
    info.redis.username = settings.username.clone();
    info.redis.password = settings.password.clone();
    Ok(info)
}
