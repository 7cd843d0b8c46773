//! Trained artifacts and model type descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::IdError;
use crate::id::{ArtifactId, AssetId, ModelTypeId, UserId};

/// Lifecycle status of a trained artifact.
///
/// Artifacts are always written as `Temporal`; promotion and demotion happen
/// outside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactStatus {
    Temporal,
    Active,
    Inactive,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Temporal => "Temporal",
            ArtifactStatus::Active => "Active",
            ArtifactStatus::Inactive => "Inactive",
        }
    }
}

impl core::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ArtifactStatus {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Temporal" => Ok(ArtifactStatus::Temporal),
            "Active" => Ok(ArtifactStatus::Active),
            "Inactive" => Ok(ArtifactStatus::Inactive),
            other => Err(IdError(format!("ArtifactStatus: unknown status '{other}'"))),
        }
    }
}

/// The persisted result of one successfully trained job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedArtifact {
    pub id: ArtifactId,
    pub model_type_ref: ModelTypeId,
    pub user_ref: UserId,
    pub asset_ref: AssetId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Evaluation on the held-out test window.
    pub performance_metrics: JsonValue,
    pub hyperparameters: JsonValue,
    pub architecture_descriptor: JsonValue,
    pub serialized_bytes: Vec<u8>,
    /// Evaluation on the validation window.
    pub validation_metrics: JsonValue,
    pub status: ArtifactStatus,
}

/// Catalog entry for a model kind, unique by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTypeDescriptor {
    pub id: ModelTypeId,
    pub name: String,
    pub description: String,
    pub default_hyperparameters: JsonValue,
    pub default_architecture: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_form() {
        for status in [
            ArtifactStatus::Temporal,
            ArtifactStatus::Active,
            ArtifactStatus::Inactive,
        ] {
            assert_eq!(status.as_str().parse::<ArtifactStatus>().unwrap(), status);
        }
        assert!("Deleted".parse::<ArtifactStatus>().is_err());
    }

    #[test]
    fn status_serializes_as_its_name() {
        let json = serde_json::to_string(&ArtifactStatus::Temporal).unwrap();
        assert_eq!(json, "\"Temporal\"");
    }
}
