//! Artifact and model-type storage abstractions with in-memory implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use typhoon_ai::ModelDescription;
use typhoon_core::{ArtifactId, ModelTypeDescriptor, ModelTypeId, TrainedArtifact};

use crate::db::StoreError;

/// Trained artifact table.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Insert one artifact row. A duplicate id is a `Constraint` error.
    async fn insert(&self, artifact: &TrainedArtifact) -> Result<(), StoreError>;

    async fn get(&self, id: ArtifactId) -> Result<Option<TrainedArtifact>, StoreError>;
}

/// Catalog of model kinds, unique by name.
#[async_trait]
pub trait ModelTypeStore: Send + Sync + 'static {
    /// Return the descriptor named `description.name`, creating it first if absent.
    ///
    /// Concurrent callers for the same name observe the same descriptor.
    async fn ensure(&self, description: &ModelDescription) -> Result<ModelTypeDescriptor, StoreError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<ModelTypeDescriptor>, StoreError>;
}

#[async_trait]
impl<T> ArtifactStore for Arc<T>
where
    T: ArtifactStore + ?Sized,
{
    async fn insert(&self, artifact: &TrainedArtifact) -> Result<(), StoreError> {
        (**self).insert(artifact).await
    }

    async fn get(&self, id: ArtifactId) -> Result<Option<TrainedArtifact>, StoreError> {
        (**self).get(id).await
    }
}

#[async_trait]
impl<T> ModelTypeStore for Arc<T>
where
    T: ModelTypeStore + ?Sized,
{
    async fn ensure(&self, description: &ModelDescription) -> Result<ModelTypeDescriptor, StoreError> {
        (**self).ensure(description).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ModelTypeDescriptor>, StoreError> {
        (**self).get_by_name(name).await
    }
}

/// In-memory artifact table for tests/dev. Rows keep insertion order.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    rows: RwLock<Vec<TrainedArtifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::poisoned("artifact store"))?;
        Ok(rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// All rows in insertion order.
    pub fn snapshot(&self) -> Result<Vec<TrainedArtifact>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::poisoned("artifact store"))?;
        Ok(rows.clone())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn insert(&self, artifact: &TrainedArtifact) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::poisoned("artifact store"))?;
        if rows.iter().any(|row| row.id == artifact.id) {
            return Err(StoreError::Constraint(format!(
                "trained artifact {} already exists",
                artifact.id
            )));
        }
        rows.push(artifact.clone());
        Ok(())
    }

    async fn get(&self, id: ArtifactId) -> Result<Option<TrainedArtifact>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::poisoned("artifact store"))?;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }
}

#[derive(Debug, Default)]
struct Catalog {
    by_name: HashMap<String, ModelTypeDescriptor>,
    next_id: i64,
}

/// In-memory model-type catalog for tests/dev. Ids are assigned from 1.
#[derive(Debug, Default)]
pub struct InMemoryModelTypeStore {
    inner: Mutex<Catalog>,
}

impl InMemoryModelTypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("model type store"))?;
        Ok(inner.by_name.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ModelTypeStore for InMemoryModelTypeStore {
    async fn ensure(&self, description: &ModelDescription) -> Result<ModelTypeDescriptor, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("model type store"))?;
        if let Some(existing) = inner.by_name.get(&description.name) {
            return Ok(existing.clone());
        }

        inner.next_id += 1;
        let descriptor = ModelTypeDescriptor {
            id: ModelTypeId(inner.next_id),
            name: description.name.clone(),
            description: description.description.clone(),
            default_hyperparameters: description.default_hyperparameters.clone(),
            default_architecture: description.default_architecture.clone(),
        };
        inner.by_name.insert(descriptor.name.clone(), descriptor.clone());
        Ok(descriptor)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ModelTypeDescriptor>, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("model type store"))?;
        Ok(inner.by_name.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use typhoon_core::{ArtifactStatus, AssetId, UserId};

    fn description(name: &str) -> ModelDescription {
        ModelDescription {
            name: name.to_string(),
            description: "test model".to_string(),
            default_hyperparameters: json!({"units": 50}),
            default_architecture: json!({"layers": 2}),
        }
    }

    fn artifact() -> TrainedArtifact {
        TrainedArtifact {
            id: ArtifactId::new(),
            model_type_ref: ModelTypeId(1),
            user_ref: UserId(1),
            asset_ref: AssetId(2),
            name: "lstm".to_string(),
            created_at: Utc::now(),
            performance_metrics: json!({"loss": 0.5}),
            hyperparameters: json!({}),
            architecture_descriptor: json!({}),
            serialized_bytes: vec![1, 2, 3],
            validation_metrics: json!({"loss": 0.4}),
            status: ArtifactStatus::Temporal,
        }
    }

    #[tokio::test]
    async fn ensure_is_idempotent_per_name() {
        let store = InMemoryModelTypeStore::new();
        let a = store.ensure(&description("lstm")).await.unwrap();
        let b = store.ensure(&description("lstm")).await.unwrap();
        let c = store.ensure(&description("gru")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get_by_name("gru").await.unwrap(), Some(c));
        assert!(store.get_by_name("transformer").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ensure_keeps_the_first_description() {
        let store = InMemoryModelTypeStore::new();
        store.ensure(&description("lstm")).await.unwrap();

        let mut changed = description("lstm");
        changed.description = "something else".to_string();
        let descriptor = store.ensure(&changed).await.unwrap();

        assert_eq!(descriptor.description, "test model");
    }

    #[tokio::test]
    async fn artifacts_round_trip() {
        let store = InMemoryArtifactStore::new();
        let artifact = artifact();
        store.insert(&artifact).await.unwrap();

        assert_eq!(store.get(artifact.id).await.unwrap(), Some(artifact.clone()));
        assert!(matches!(
            store.insert(&artifact).await,
            Err(StoreError::Constraint(_))
        ));
        assert_eq!(store.len().unwrap(), 1);
    }
}
