use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use typhoon_core::AssetId;

use crate::error::BackendError;

/// Source of an asset's historical closing prices, oldest first.
#[async_trait]
pub trait PriceHistory: Send + Sync + 'static {
    async fn closes(&self, asset_id: AssetId) -> Result<Vec<f64>, BackendError>;
}

#[async_trait]
impl<T> PriceHistory for Arc<T>
where
    T: PriceHistory + ?Sized,
{
    async fn closes(&self, asset_id: AssetId) -> Result<Vec<f64>, BackendError> {
        (**self).closes(asset_id).await
    }
}

/// In-memory price history (tests/dev).
///
/// Unknown assets have an empty history.
#[derive(Debug, Default)]
pub struct InMemoryPriceHistory {
    inner: RwLock<HashMap<AssetId, Vec<f64>>>,
}

impl InMemoryPriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, asset_id: AssetId, closes: Vec<f64>) -> Result<(), BackendError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| BackendError::DataSource("price history lock poisoned".to_string()))?;
        guard.insert(asset_id, closes);
        Ok(())
    }

    pub fn with_series(self, asset_id: AssetId, closes: Vec<f64>) -> Self {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(asset_id, closes);
        }
        self
    }
}

#[async_trait]
impl PriceHistory for InMemoryPriceHistory {
    async fn closes(&self, asset_id: AssetId) -> Result<Vec<f64>, BackendError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| BackendError::DataSource("price history lock poisoned".to_string()))?;
        Ok(guard.get(&asset_id).cloned().unwrap_or_default())
    }
}
