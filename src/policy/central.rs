use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::CounterResult,
    period::{Limits, Period},
    policy::CounterPolicy,
    scope::Scope,
    strategy::CounterStrategy,
};

pub struct CentralPolicy {
    strategy: Arc<dyn CounterStrategy>,
}

impl CentralPolicy {
    pub fn new(strategy: Arc<dyn CounterStrategy>) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl CounterPolicy for CentralPolicy {
    fn name(&self) -> &'static str {
        "central"
    }

    async fn increment(
        &self,
        scope: &Scope,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        value: i64,
    ) -> CounterResult<()> {
        self.strategy
            .increment(limits, identifier, now, scope, value)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    strategy = self.strategy.name(),
                    identifier,
                    error = %err,
                    "cluster counter increment failed"
                );
            })
    }

    async fn usage(
        &self,
        scope: &Scope,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> CounterResult<i64> {
        let row = self
            .strategy
            .find(identifier, period, now, scope)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    strategy = self.strategy.name(),
                    identifier,
                    period = %period,
                    error = %err,
                    "cluster counter lookup failed"
                );
            })?;

        Ok(row.map(|row| row.value).filter(|value| *value > 0).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        error::CounterError,
        strategy::{CounterRow, RowKey},
    };

    #[derive(Default)]
    struct FixedStrategy {
        value: Option<i64>,
        fail: bool,
        calls: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl CounterStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn increment(
            &self,
            _limits: &Limits,
            identifier: &str,
            _now: DateTime<Utc>,
            _scope: &Scope,
            value: i64,
        ) -> CounterResult<()> {
            if self.fail {
                return Err(CounterError::Strategy("database unavailable".into()));
            }
            self.calls.lock().unwrap().push((identifier.to_string(), value));
            Ok(())
        }

        async fn find(
            &self,
            identifier: &str,
            period: Period,
            now: DateTime<Utc>,
            scope: &Scope,
        ) -> CounterResult<Option<CounterRow>> {
            if self.fail {
                return Err(CounterError::Strategy("database unavailable".into()));
            }
            Ok(self.value.map(|value| CounterRow {
                key: RowKey::new(scope, identifier, period, now),
                value,
                expires_at: now.timestamp() + period.expiration_secs(),
            }))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 10, 4, 0).unwrap()
    }

    async fn usage_with(value: Option<i64>) -> i64 {
        let policy = CentralPolicy::new(Arc::new(FixedStrategy {
            value,
            ..Default::default()
        }));
        policy
            .usage(&Scope::unscoped(), "client-A", Period::Minute, t0())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn absent_or_non_positive_rows_read_zero() {
        assert_eq!(usage_with(None).await, 0);
        assert_eq!(usage_with(Some(0)).await, 0);
        assert_eq!(usage_with(Some(-3)).await, 0);
        assert_eq!(usage_with(Some(12)).await, 12);
    }

    #[tokio::test]
    async fn forwards_increments_and_propagates_errors() {
        let strategy = Arc::new(FixedStrategy::default());
        let policy = CentralPolicy::new(strategy.clone());
        let limits = Limits::new().with(Period::Minute, true);
        policy
            .increment(&Scope::unscoped(), &limits, "client-A", t0(), 5)
            .await
            .unwrap();
        assert_eq!(*strategy.calls.lock().unwrap(), vec![("client-A".to_string(), 5)]);

        let failing = CentralPolicy::new(Arc::new(FixedStrategy {
            fail: true,
            ..Default::default()
        }));
        assert!(matches!(
            failing.increment(&Scope::unscoped(), &limits, "client-A", t0(), 1).await,
            Err(CounterError::Strategy(_))
        ));
        assert!(matches!(
            failing.usage(&Scope::unscoped(), "client-A", Period::Minute, t0()).await,
            Err(CounterError::Strategy(_))
        ));
    }

    #[tokio::test]
    async fn journal_backed_round_trip() {
        let path = std::env::temp_dir().join(format!("windowcount-{}.jsonl", uuid::Uuid::new_v4()));
        let journal = crate::strategy::JournalStrategy::open(&path).await.unwrap();
        let policy = CentralPolicy::new(Arc::new(journal));
        let scope = Scope::unscoped();
        let now = Utc::now();
        let limits = Limits::new().with(Period::Minute, true);

        policy.increment(&scope, &limits, "client-A", now, 5).await.unwrap();
        assert_eq!(policy.usage(&scope, "client-A", Period::Minute, now).await.unwrap(), 5);

        let _ = std::fs::remove_file(&path);
    }
}
