//! `typhoon-ai`
//!
//! **Responsibility:** model backend boundary of the training scheduler.
//!
//! This crate knows nothing about queues, brokers or storage:
//! - It defines what a model backend must provide (`ModelBackend`, `TrainableModel`).
//! - It maps model type ids to backends (`BackendRegistry`).
//! - It ships a deterministic reference backend (`linear_trend`).

pub mod backend;
pub mod early_stopping;
pub mod error;
pub mod linear_trend;
pub mod metrics;
pub mod price_history;
pub mod registry;
pub mod window;

pub use backend::{FitHistory, FitOptions, ModelBackend, ModelDescription, TrainableModel, WindowSplit};
pub use early_stopping::EarlyStopping;
pub use error::BackendError;
pub use linear_trend::{LINEAR_TREND_MODEL_NAME, LinearTrendBackend, LinearTrendSnapshot};
pub use metrics::Metrics;
pub use price_history::{InMemoryPriceHistory, PriceHistory};
pub use registry::BackendRegistry;
pub use window::{DataWindows, Normalization};
