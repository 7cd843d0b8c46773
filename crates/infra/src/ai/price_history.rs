use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use typhoon_ai::{BackendError, PriceHistory};
use typhoon_core::AssetId;

/// Closing prices from `asset_price`, oldest first.
#[derive(Debug, Clone)]
pub struct PostgresPriceHistory {
    pool: Arc<PgPool>,
}

impl PostgresPriceHistory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl PriceHistory for PostgresPriceHistory {
    #[instrument(skip(self), fields(asset_id = %asset_id), err)]
    async fn closes(&self, asset_id: AssetId) -> Result<Vec<f64>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT close
            FROM asset_price
            WHERE asset_id = $1
            ORDER BY observed_at ASC
            "#,
        )
        .bind(asset_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| BackendError::DataSource(format!("failed to load prices for asset {}: {}", asset_id, e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<f64, _>("close")
                    .map_err(|e| BackendError::DataSource(format!("failed to decode asset_price row: {}", e)))
            })
            .collect()
    }
}
