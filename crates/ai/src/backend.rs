//! The model backend boundary.
//!
//! The scheduler never sees model internals. A backend:
//! - describes the model kind it trains (used to populate the model type catalog),
//! - builds a model instance bound to one asset's data windows,
//! - and that instance fits, evaluates and serializes itself.
//!
//! Building is async (it usually loads history from storage). Fitting,
//! evaluation and serialization are synchronous and CPU-bound; callers run
//! them off the async executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use typhoon_core::AssetId;

use crate::error::BackendError;
use crate::metrics::Metrics;

/// Catalog description of a model kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Unique model kind name (also used as the artifact name).
    pub name: String,
    pub description: String,
    pub default_hyperparameters: JsonValue,
    pub default_architecture: JsonValue,
}

/// Bounds on a single fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Maximum number of passes over the training window.
    pub epochs: u32,
    /// Epochs without validation-loss improvement before fitting stops.
    pub patience: u32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 20,
            patience: 2,
        }
    }
}

/// Per-epoch record of a fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub stopped_early: bool,
}

impl FitHistory {
    pub fn epochs_run(&self) -> usize {
        self.loss.len()
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.val_loss.iter().copied().reduce(f64::min)
    }
}

/// Which of the model's bound data windows to evaluate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSplit {
    Train,
    Validation,
    Test,
}

/// A model instance bound to its train/validation/test windows.
pub trait TrainableModel: Send + 'static {
    /// Fit on the training window, monitoring loss on the validation window.
    fn compile_and_fit(&mut self, options: &FitOptions) -> Result<FitHistory, BackendError>;

    fn evaluate(&self, split: WindowSplit) -> Result<Metrics, BackendError>;

    fn serialize(&self) -> Result<Vec<u8>, BackendError>;
}

/// Factory for one model kind.
#[async_trait]
pub trait ModelBackend: Send + Sync + 'static {
    fn describe(&self) -> ModelDescription;

    /// Construct a model bound to `asset_id`'s historical data.
    ///
    /// Fails with `InsufficientData`/`InvalidInput` when no usable window can
    /// be built for the asset.
    async fn build(&self, asset_id: AssetId) -> Result<Box<dyn TrainableModel>, BackendError>;
}
