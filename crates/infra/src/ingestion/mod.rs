//! Ingestion: broker submissions into the pending job queue.

pub mod adapter;
pub mod broker;
#[cfg(feature = "redis")]
pub mod redis_streams;
pub mod users;

pub use adapter::{IngestOutcome, IngestionAdapter};
pub use broker::{BrokerError, DEFAULT_MAX_DELIVERIES, Delivery, InMemoryBroker, SubmissionSource};
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsSource;
pub use users::{InMemoryUserDirectory, PostgresUserDirectory, UserDirectory};
