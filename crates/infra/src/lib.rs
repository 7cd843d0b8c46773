//! `typhoon-infra`
//!
//! **Responsibility:** the moving parts of the training scheduler.
//!
//! - `jobs`: pending and recovery queues, the priority scheduler, the
//!   training executor and the recovery manager
//! - `artifacts`: artifact and model-type storage, and the artifact persister
//! - `ingestion`: broker boundary, the ingestion adapter, Redis Streams source
//! - `workers`: the ingestion and training loops and their handles
//! - `ai`: data adapters feeding model backends
//! - `config`: environment configuration
//!
//! Every store has an in-memory implementation for tests and local runs and a
//! Postgres implementation for production. The Redis Streams source sits
//! behind the `redis` feature.

pub mod ai;
pub mod artifacts;
pub mod config;
pub mod db;
pub mod ingestion;
pub mod jobs;
pub mod workers;


pub use config::{ConfigError, StreamSettings, WorkerConfig};
pub use db::StoreError;
pub use workers::{LoopError, WorkerHandle};
