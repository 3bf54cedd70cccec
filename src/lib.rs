pub mod api;
pub mod config;
pub mod counter;
pub mod error;
pub mod period;
pub mod policy;
pub mod remote;
pub mod scope;
pub mod strategy;
pub mod sync;

pub use config::CounterConfig;
pub use counter::RateCounter;
pub use error::{CounterError, CounterResult};
pub use period::{Limits, Period};
pub use policy::CounterPolicy;
pub use scope::{EMPTY_SCOPE, Scope, cache_key};
