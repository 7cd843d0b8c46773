//! Job queues, scheduling, execution and recovery.
//!
//! ## Components
//!
//! - `JobStore` / `RecoveryStore`: durable pending and recovery queues (in-memory or Postgres)
//! - `PriorityScheduler`: anti-starvation selection over the pending queue
//! - `TrainingExecutor`: drives a model backend for one claimed job
//! - `RecoveryManager`: diverts failed jobs and drains the recovery queue

pub mod executor;
pub mod postgres;
pub mod recovery;
pub mod scheduler;
pub mod store;

pub use executor::{TrainingError, TrainingExecutor};
pub use postgres::{PostgresJobStore, PostgresRecoveryStore};
pub use recovery::{DEFAULT_MAX_ATTEMPTS, DrainReport, RecoveryManager};
pub use scheduler::{DEFAULT_STREAK_LIMIT, PriorityScheduler};
pub use store::{InMemoryJobStore, InMemoryRecoveryStore, JobStore, RecoveryStore};
