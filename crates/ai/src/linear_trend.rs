use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use typhoon_core::AssetId;

use crate::backend::{
    FitHistory, FitOptions, ModelBackend, ModelDescription, TrainableModel, WindowSplit,
};
use crate::early_stopping::EarlyStopping;
use crate::error::BackendError;
use crate::metrics::Metrics;
use crate::price_history::PriceHistory;
use crate::window::DataWindows;

pub const LINEAR_TREND_MODEL_NAME: &str = "linear_trend";

/// Deterministic autoregressive baseline backend.
///
/// Model:
/// - Split the asset's closing prices 70/20/10 and normalize with training statistics.
/// - Predict the next normalized close as a linear combination of the previous `lags` closes.
/// - Fit by per-sample gradient descent on mean squared error, one pass per epoch.
///
/// Starts from zero weights and visits samples in order, so identical
/// inputs always produce identical artifacts.
#[derive(Clone)]
pub struct LinearTrendBackend {
    history: Arc<dyn PriceHistory>,
    lags: usize,
    learning_rate: f64,
}

impl LinearTrendBackend {
    pub fn new(history: Arc<dyn PriceHistory>) -> Self {
        Self {
            history,
            lags: 3,
            learning_rate: 0.01,
        }
    }

    pub fn with_lags(mut self, lags: usize) -> Self {
        self.lags = lags;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }
}

#[async_trait]
impl ModelBackend for LinearTrendBackend {
    fn describe(&self) -> ModelDescription {
        ModelDescription {
            name: LINEAR_TREND_MODEL_NAME.to_string(),
            description: "Linear autoregression over normalized closing prices. \
                Predicts the next close from the previous closes with a single linear layer."
                .to_string(),
            default_hyperparameters: json!({
                "lags": self.lags,
                "learning_rate": self.learning_rate,
            }),
            default_architecture: json!({
                "layers": { "layer1": format!("Linear({} -> 1)", self.lags) },
            }),
        }
    }

    async fn build(&self, asset_id: AssetId) -> Result<Box<dyn TrainableModel>, BackendError> {
        if self.lags == 0 {
            return Err(BackendError::InvalidInput("lags must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(BackendError::InvalidInput(
                "learning_rate must be a finite positive number".to_string(),
            ));
        }

        let closes = self.history.closes(asset_id).await?;
        // Each split needs at least one supervised pair.
        let windows = DataWindows::from_series(&closes, self.lags + 1)?;

        debug!(
            asset_id = %asset_id,
            points = closes.len(),
            lags = self.lags,
            "linear_trend model built"
        );

        Ok(Box::new(LinearTrendModel {
            windows,
            lags: self.lags,
            learning_rate: self.learning_rate,
            weights: vec![0.0; self.lags],
            bias: 0.0,
        }))
    }
}

/// Serialized form of a fitted linear trend model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrendSnapshot {
    pub lags: usize,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug)]
struct LinearTrendModel {
    windows: DataWindows,
    lags: usize,
    learning_rate: f64,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearTrendModel {
    fn predict(&self, inputs: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(inputs)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }

    fn epoch(&mut self) {
        let pairs: Vec<(Vec<f64>, f64)> = self
            .windows
            .lagged_pairs(WindowSplit::Train, self.lags)
            .into_iter()
            .map(|(inputs, label)| (inputs.to_vec(), label))
            .collect();

        for (inputs, label) in pairs {
            let err = self.predict(&inputs) - label;
            let step = 2.0 * self.learning_rate * err;
            for (w, x) in self.weights.iter_mut().zip(&inputs) {
                *w -= step * x;
            }
            self.bias -= step;
        }
    }

    /// (mse, mae) over one split.
    fn errors(&self, split: WindowSplit) -> (f64, f64) {
        let pairs = self.windows.lagged_pairs(split, self.lags);
        if pairs.is_empty() {
            return (f64::NAN, f64::NAN);
        }
        let (sq, abs) = pairs.iter().fold((0.0, 0.0), |(sq, abs), (inputs, label)| {
            let err = self.predict(inputs) - label;
            (sq + err * err, abs + err.abs())
        });
        let n = pairs.len() as f64;
        (sq / n, abs / n)
    }
}

impl TrainableModel for LinearTrendModel {
    fn compile_and_fit(&mut self, options: &FitOptions) -> Result<FitHistory, BackendError> {
        let mut history = FitHistory::default();
        let mut early_stopping = EarlyStopping::new(options.patience);

        for epoch in 0..options.epochs {
            self.epoch();

            let (loss, _) = self.errors(WindowSplit::Train);
            let (val_loss, _) = self.errors(WindowSplit::Validation);
            if !loss.is_finite() {
                return Err(BackendError::Training(format!(
                    "training loss diverged at epoch {epoch}"
                )));
            }
            history.loss.push(loss);
            history.val_loss.push(val_loss);

            if early_stopping.observe(val_loss) {
                history.stopped_early = epoch + 1 < options.epochs;
                break;
            }
        }

        Ok(history)
    }

    fn evaluate(&self, split: WindowSplit) -> Result<Metrics, BackendError> {
        let (mse, mae) = self.errors(split);
        if !(mse.is_finite() && mae.is_finite()) {
            return Err(BackendError::Training(format!(
                "evaluation on {split:?} window is not finite"
            )));
        }
        Ok(Metrics::new()
            .with("loss", mse)
            .with("mean_absolute_error", mae))
    }

    fn serialize(&self) -> Result<Vec<u8>, BackendError> {
        let normalization = self.windows.normalization();
        let snapshot = LinearTrendSnapshot {
            lags: self.lags,
            weights: self.weights.clone(),
            bias: self.bias,
            mean: normalization.mean,
            std: normalization.std,
        };
        serde_json::to_vec(&snapshot).map_err(|e| BackendError::Serialization(e.to_string()))
    }
}
