//! Train/validation/test windows over a univariate series.
//!
//! The series is split chronologically 70/20/10 and every split is
//! normalized with the training split's mean and sample standard deviation,
//! so no statistics leak from validation or test into training.

use serde::{Deserialize, Serialize};

use crate::backend::WindowSplit;
use crate::error::BackendError;

const TRAIN_FRACTION: f64 = 0.7;
const VALIDATION_END_FRACTION: f64 = 0.9;

/// Normalization parameters derived from the training split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f64,
    pub std: f64,
}

impl Normalization {
    pub fn apply(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }

    pub fn invert(&self, z: f64) -> f64 {
        z * self.std + self.mean
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataWindows {
    train: Vec<f64>,
    validation: Vec<f64>,
    test: Vec<f64>,
    normalization: Normalization,
}

impl DataWindows {
    /// Split and normalize `series`.
    ///
    /// Every split must hold at least `min_split_len` points.
    pub fn from_series(series: &[f64], min_split_len: usize) -> Result<Self, BackendError> {
        if let Some(pos) = series.iter().position(|x| !x.is_finite()) {
            return Err(BackendError::InvalidInput(format!(
                "series contains a non-finite value at position {pos}"
            )));
        }

        let n = series.len();
        let train_end = (n as f64 * TRAIN_FRACTION) as usize;
        let val_end = (n as f64 * VALIDATION_END_FRACTION) as usize;

        let (train, rest) = series.split_at(train_end);
        let (validation, test) = rest.split_at(val_end - train_end);

        let shortest = train.len().min(validation.len()).min(test.len());
        if shortest < min_split_len.max(2) {
            return Err(BackendError::InsufficientData(format!(
                "{n} points give splits of {}/{}/{}, need at least {} each",
                train.len(),
                validation.len(),
                test.len(),
                min_split_len.max(2)
            )));
        }

        let mean = mean(train);
        let std = stddev_sample(train, mean);
        if std <= f64::EPSILON {
            return Err(BackendError::InvalidInput(
                "training split is constant; cannot normalize".to_string(),
            ));
        }
        let normalization = Normalization { mean, std };

        let norm = |xs: &[f64]| xs.iter().map(|x| normalization.apply(*x)).collect::<Vec<_>>();

        Ok(Self {
            train: norm(train),
            validation: norm(validation),
            test: norm(test),
            normalization,
        })
    }

    pub fn split(&self, split: WindowSplit) -> &[f64] {
        match split {
            WindowSplit::Train => &self.train,
            WindowSplit::Validation => &self.validation,
            WindowSplit::Test => &self.test,
        }
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Supervised pairs within one split: `lags` consecutive inputs, next value as label.
    ///
    /// Pairs never straddle split boundaries.
    pub fn lagged_pairs(&self, split: WindowSplit, lags: usize) -> Vec<(&[f64], f64)> {
        let xs = self.split(split);
        if lags == 0 || xs.len() <= lags {
            return Vec::new();
        }
        (lags..xs.len()).map(|t| (&xs[t - lags..t], xs[t])).collect()
    }
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1).
pub(crate) fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}
