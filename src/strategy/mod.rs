pub mod journal;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::CounterResult,
    period::{BucketLabel, Limits, Period},
    scope::Scope,
};

pub use journal::JournalStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub identifier: String,
    pub period: Period,
    pub period_date: BucketLabel,
    pub service_id: Uuid,
    pub route_id: Uuid,
}

impl RowKey {
    pub fn new(scope: &Scope, identifier: &str, period: Period, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            period,
            period_date: period.bucket_label(now),
            service_id: scope.service_id,
            route_id: scope.route_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRow {
    #[serde(flatten)]
    pub key: RowKey,
    pub value: i64,
    // Epoch seconds.
    pub expires_at: i64,
}

#[async_trait]
pub trait CounterStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn increment(
        &self,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        scope: &Scope,
        value: i64,
    ) -> CounterResult<()>;

    async fn find(
        &self,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
        scope: &Scope,
    ) -> CounterResult<Option<CounterRow>>;
}
