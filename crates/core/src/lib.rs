//! `typhoon-core`
//!
//! **Responsibility:** data model of the training-job scheduler.
//!
//! This crate contains **pure data** (no storage, broker or backend concerns):
//! identifiers, queue entries, trained artifacts and the submission payload.

pub mod artifact;
pub mod error;
pub mod id;
pub mod job;
pub mod submission;

pub use artifact::{ArtifactStatus, ModelTypeDescriptor, TrainedArtifact};
pub use error::{DecodeError, IdError};
pub use id::{ArtifactId, AssetId, JobId, ModelTypeId, RecoveryJobId, UserId};
pub use job::{Job, JobRef, NewJob, NewRecoveryJob, QueuedJob, RecoveryJob, TrainingTarget};
pub use submission::JobSubmission;
