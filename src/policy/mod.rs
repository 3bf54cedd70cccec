pub mod central;
pub mod local;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::CounterResult,
    period::{Limits, Period},
    scope::Scope,
};

pub use central::CentralPolicy;
pub use local::{LocalPolicy, LocalStore};
pub use redis::RedisPolicy;

#[async_trait]
pub trait CounterPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn increment(
        &self,
        scope: &Scope,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        value: i64,
    ) -> CounterResult<()>;

    // Count for the bucket of `period` containing `now`; zero when nothing
    // was recorded.
    async fn usage(
        &self,
        scope: &Scope,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> CounterResult<i64>;

    async fn shutdown(&self) -> CounterResult<()> {
        Ok(())
    }
}
