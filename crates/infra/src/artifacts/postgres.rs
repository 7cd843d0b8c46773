//! Postgres-backed artifact table and model-type catalog.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use typhoon_ai::ModelDescription;
use typhoon_core::{
    ArtifactId, ArtifactStatus, AssetId, ModelTypeDescriptor, ModelTypeId, TrainedArtifact, UserId,
};

use super::store::{ArtifactStore, ModelTypeStore};
use crate::db::{StoreError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresArtifactStore {
    pool: Arc<PgPool>,
}

impl PostgresArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    #[instrument(
        skip(self, artifact),
        fields(
            artifact_id = %artifact.id,
            user_id = %artifact.user_ref,
            asset_id = %artifact.asset_ref,
            bytes = artifact.serialized_bytes.len()
        ),
        err
    )]
    async fn insert(&self, artifact: &TrainedArtifact) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trained_artifact (
                id, model_type_id, user_id, asset_id, name, created_at,
                performance_metrics, hyperparameters, architecture,
                serialized_model, validation_metrics, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(artifact.id.as_uuid())
        .bind(artifact.model_type_ref.get())
        .bind(artifact.user_ref.get())
        .bind(artifact.asset_ref.get())
        .bind(&artifact.name)
        .bind(artifact.created_at)
        .bind(&artifact.performance_metrics)
        .bind(&artifact.hyperparameters)
        .bind(&artifact.architecture_descriptor)
        .bind(&artifact.serialized_bytes)
        .bind(&artifact.validation_metrics)
        .bind(artifact.status.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_artifact", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(artifact_id = %id), err)]
    async fn get(&self, id: ArtifactId) -> Result<Option<TrainedArtifact>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, model_type_id, user_id, asset_id, name, created_at,
                   performance_metrics, hyperparameters, architecture,
                   serialized_model, validation_metrics, status
            FROM trained_artifact
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_artifact", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let row = ArtifactRow::from_row(&row)
            .map_err(|e| StoreError::Storage(format!("failed to decode trained_artifact row: {}", e)))?;
        row.try_into().map(Some)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresModelTypeStore {
    pool: Arc<PgPool>,
}

impl PostgresModelTypeStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ModelTypeStore for PostgresModelTypeStore {
    /// `ON CONFLICT (name) DO NOTHING` keeps the first writer's row; the
    /// follow-up select returns it to every caller.
    #[instrument(skip(self, description), fields(model = %description.name), err)]
    async fn ensure(&self, description: &ModelDescription) -> Result<ModelTypeDescriptor, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO model_type (name, description, default_hyperparameters, default_architecture)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&description.name)
        .bind(&description.description)
        .bind(&description.default_hyperparameters)
        .bind(&description.default_architecture)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_model_type", e))?;

        self.get_by_name(&description.name).await?.ok_or_else(|| {
            StoreError::Storage(format!(
                "model type '{}' missing after insert",
                description.name
            ))
        })
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ModelTypeDescriptor>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, default_hyperparameters, default_architecture
            FROM model_type
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_model_type", e))?;

        row.map(|row| {
            ModelTypeRow::from_row(&row)
                .map(Into::into)
                .map_err(|e| StoreError::Storage(format!("failed to decode model_type row: {}", e)))
        })
        .transpose()
    }
}

// SQLx row types

#[derive(Debug)]
struct ArtifactRow {
    id: Uuid,
    model_type_id: i64,
    user_id: i64,
    asset_id: i64,
    name: String,
    created_at: DateTime<Utc>,
    performance_metrics: JsonValue,
    hyperparameters: JsonValue,
    architecture: JsonValue,
    serialized_model: Vec<u8>,
    validation_metrics: JsonValue,
    status: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ArtifactRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ArtifactRow {
            id: row.try_get("id")?,
            model_type_id: row.try_get("model_type_id")?,
            user_id: row.try_get("user_id")?,
            asset_id: row.try_get("asset_id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
            performance_metrics: row.try_get("performance_metrics")?,
            hyperparameters: row.try_get("hyperparameters")?,
            architecture: row.try_get("architecture")?,
            serialized_model: row.try_get("serialized_model")?,
            validation_metrics: row.try_get("validation_metrics")?,
            status: row.try_get("status")?,
        })
    }
}

impl TryFrom<ArtifactRow> for TrainedArtifact {
    type Error = StoreError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let status: ArtifactStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Storage(format!("trained_artifact {}: {}", row.id, e)))?;

        Ok(TrainedArtifact {
            id: ArtifactId::from_uuid(row.id),
            model_type_ref: ModelTypeId(row.model_type_id),
            user_ref: UserId(row.user_id),
            asset_ref: AssetId(row.asset_id),
            name: row.name,
            created_at: row.created_at,
            performance_metrics: row.performance_metrics,
            hyperparameters: row.hyperparameters,
            architecture_descriptor: row.architecture,
            serialized_bytes: row.serialized_model,
            validation_metrics: row.validation_metrics,
            status,
        })
    }
}

#[derive(Debug)]
struct ModelTypeRow {
    id: i64,
    name: String,
    description: String,
    default_hyperparameters: JsonValue,
    default_architecture: JsonValue,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ModelTypeRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ModelTypeRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            default_hyperparameters: row.try_get("default_hyperparameters")?,
            default_architecture: row.try_get("default_architecture")?,
        })
    }
}

impl From<ModelTypeRow> for ModelTypeDescriptor {
    fn from(row: ModelTypeRow) -> Self {
        ModelTypeDescriptor {
            id: ModelTypeId(row.id),
            name: row.name,
            description: row.description,
            default_hyperparameters: row.default_hyperparameters,
            default_architecture: row.default_architecture,
        }
    }
}
