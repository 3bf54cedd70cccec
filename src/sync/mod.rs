pub mod scheduler;
pub mod state;

pub use scheduler::{FlushJob, SyncScheduler, flush};
pub use state::{Delta, Snapshot, SyncState};
