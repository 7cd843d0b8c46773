use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use typhoon_core::{ArtifactId, TrainedArtifact};

use super::store::ArtifactStore;
use crate::db::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The write could not be confirmed; the job is lost for this cycle.
    #[error("artifact {0} not stored: read-after-write check failed")]
    NotStored(ArtifactId),
}

impl PersistError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PersistError::Store(e) if e.is_fatal())
    }
}

/// Writes trained artifacts and confirms each write by reading it back.
///
/// Never retries: a failed or unconfirmed write is logged and reported.
#[derive(Clone)]
pub struct ArtifactPersister {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactPersister {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub async fn persist(&self, artifact: TrainedArtifact) -> Result<ArtifactId, PersistError> {
        let id = artifact.id;

        if let Err(e) = self.store.insert(&artifact).await {
            error!(artifact_id = %id, error = %e, "artifact insert failed");
            return Err(PersistError::Store(e));
        }

        match self.store.get(id).await {
            Ok(Some(stored)) if stored.serialized_bytes == artifact.serialized_bytes => {
                info!(
                    artifact_id = %id,
                    user_id = %artifact.user_ref,
                    asset_id = %artifact.asset_ref,
                    model = %artifact.name,
                    bytes = artifact.serialized_bytes.len(),
                    "artifact stored"
                );
                Ok(id)
            }
            Ok(Some(_)) => {
                error!(artifact_id = %id, "stored artifact bytes differ from the trained model");
                Err(PersistError::NotStored(id))
            }
            Ok(None) => {
                error!(artifact_id = %id, "artifact missing on read-back");
                Err(PersistError::NotStored(id))
            }
            Err(e) if e.is_fatal() => Err(PersistError::Store(e)),
            Err(e) => {
                warn!(artifact_id = %id, error = %e, "artifact read-back failed");
                Err(PersistError::NotStored(id))
            }
        }
    }
}

impl core::fmt::Debug for ArtifactPersister {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArtifactPersister").finish_non_exhaustive()
    }
}
