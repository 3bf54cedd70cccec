use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::{CounterConfig, PolicyConfig},
    error::CounterResult,
    period::{Limits, Period},
    policy::{CentralPolicy, CounterPolicy, LocalPolicy, LocalStore, RedisPolicy},
    remote::pool::RedisPools,
    scope::Scope,
    strategy::JournalStrategy,
};

#[derive(Clone)]
pub struct RateCounter {
    policy: Arc<dyn CounterPolicy>,
    scope: Scope,
}

impl RateCounter {
    pub fn new(policy: Arc<dyn CounterPolicy>, scope: Scope) -> Self {
        Self { policy, scope }
    }

    pub async fn from_config(config: &CounterConfig) -> CounterResult<Self> {
        let policy: Arc<dyn CounterPolicy> = match &config.policy {
            PolicyConfig::Local { max_entries } => {
                Arc::new(LocalPolicy::new(Arc::new(LocalStore::new(*max_entries))))
            }
            PolicyConfig::Central {
                journal_path,
                compact_interval,
            } => {
                let journal = Arc::new(JournalStrategy::open(journal_path.clone()).await?);
                journal.spawn_compactor(*compact_interval);
                Arc::new(CentralPolicy::new(journal))
            }
            PolicyConfig::Redis(redis) => {
                Arc::new(RedisPolicy::connect(Arc::new(RedisPools::new()), redis))
            }
        };

        tracing::info!(
            policy = policy.name(),
            service_id = %config.scope.service_id,
            route_id = %config.scope.route_id,
            "rate counter ready"
        );
        Ok(Self::new(policy, config.scope))
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn increment(
        &self,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        value: i64,
    ) -> CounterResult<()> {
        self.policy
            .increment(&self.scope, limits, identifier, now, value)
            .await
    }

    pub async fn usage(
        &self,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> CounterResult<i64> {
        self.policy.usage(&self.scope, identifier, period, now).await
    }

    pub async fn shutdown(&self) -> CounterResult<()> {
        self.policy.shutdown().await
    }
}
