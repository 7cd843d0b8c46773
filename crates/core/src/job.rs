//! Queue entries: pending jobs and recovery jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AssetId, JobId, ModelTypeId, RecoveryJobId, UserId};

/// What to train: one model kind, for one asset, on behalf of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingTarget {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub model_type_id: ModelTypeId,
}

impl TrainingTarget {
    pub fn new(user_id: UserId, asset_id: AssetId, model_type_id: ModelTypeId) -> Self {
        Self {
            user_id,
            asset_id,
            model_type_id,
        }
    }
}

/// A pending job in the main queue.
///
/// Rows are immutable once inserted; the only transition is removal when a
/// scheduler claims the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub model_type_id: ModelTypeId,
    /// FIFO key within a priority class.
    pub created_at: DateTime<Utc>,
    pub priority: bool,
}

/// Insert request for the main queue (the store assigns `id` and `created_at`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub target: TrainingTarget,
    pub priority: bool,
}

impl NewJob {
    pub fn new(target: TrainingTarget, priority: bool) -> Self {
        Self { target, priority }
    }

    pub fn priority(target: TrainingTarget) -> Self {
        Self::new(target, true)
    }

    pub fn normal(target: TrainingTarget) -> Self {
        Self::new(target, false)
    }

    /// Materialize the row with a fresh id and the given insertion time.
    pub fn into_job(self, created_at: DateTime<Utc>) -> Job {
        Job {
            id: JobId::new(),
            user_id: self.target.user_id,
            asset_id: self.target.asset_id,
            model_type_id: self.target.model_type_id,
            created_at,
            priority: self.priority,
        }
    }
}

/// A job whose execution failed, waiting in the recovery table.
///
/// Recovery entries carry no priority flag: they are always drained FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryJob {
    pub id: RecoveryJobId,
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub model_type_id: ModelTypeId,
    pub created_at: DateTime<Utc>,
    /// Failed recovery attempts so far (0 when copied from a failed job).
    pub attempts: u32,
}

/// Insert request for the recovery table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecoveryJob {
    pub target: TrainingTarget,
    pub attempts: u32,
}

impl NewRecoveryJob {
    /// First recovery entry for a job that failed in the main loop.
    pub fn from_failed(job: &Job) -> Self {
        Self {
            target: job.target(),
            attempts: 0,
        }
    }

    /// Tail re-insert of a recovery entry that failed again.
    pub fn retry_of(job: &RecoveryJob) -> Self {
        Self {
            target: job.target(),
            attempts: job.attempts.saturating_add(1),
        }
    }

    pub fn into_recovery_job(self, created_at: DateTime<Utc>) -> RecoveryJob {
        RecoveryJob {
            id: RecoveryJobId::new(),
            user_id: self.target.user_id,
            asset_id: self.target.asset_id,
            model_type_id: self.target.model_type_id,
            created_at,
            attempts: self.attempts,
        }
    }
}

/// Identity of a queue entry, carried by errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "queue", content = "id")]
pub enum JobRef {
    Pending(JobId),
    Recovery(RecoveryJobId),
}

impl core::fmt::Display for JobRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JobRef::Pending(id) => write!(f, "job/{id}"),
            JobRef::Recovery(id) => write!(f, "recovery_job/{id}"),
        }
    }
}

/// Anything the training executor can run.
pub trait QueuedJob {
    fn job_ref(&self) -> JobRef;

    fn target(&self) -> TrainingTarget;
}

impl QueuedJob for Job {
    fn job_ref(&self) -> JobRef {
        JobRef::Pending(self.id)
    }

    fn target(&self) -> TrainingTarget {
        TrainingTarget::new(self.user_id, self.asset_id, self.model_type_id)
    }
}

impl QueuedJob for RecoveryJob {
    fn job_ref(&self) -> JobRef {
        JobRef::Recovery(self.id)
    }

    fn target(&self) -> TrainingTarget {
        TrainingTarget::new(self.user_id, self.asset_id, self.model_type_id)
    }
}
