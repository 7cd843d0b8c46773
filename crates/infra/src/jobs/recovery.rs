//! Failure recovery: the recovery table and its drain loop.

use std::sync::Arc;

use tracing::{error, info, warn};

use typhoon_core::{Job, NewRecoveryJob, QueuedJob, RecoveryJob};

use super::executor::{TrainingError, TrainingExecutor};
use super::store::RecoveryStore;
use crate::artifacts::{ArtifactPersister, PersistError};
use crate::db::StoreError;

/// Attempts a recovery entry gets in total before it is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome counts of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: u32,
    pub requeued: u32,
    pub abandoned: u32,
    /// Trained, but the artifact write could not be confirmed.
    pub not_stored: u32,
}

impl DrainReport {
    pub fn processed(&self) -> u32 {
        self.succeeded + self.requeued + self.abandoned + self.not_stored
    }
}

/// Moves failed jobs into the recovery table and drains it on demand.
///
/// A drain claims (removes) the oldest entry before running it. A failed
/// entry goes back to the tail with `attempts + 1`; once an entry has been
/// attempted `max_attempts` times it is dropped with an error log. Each
/// entry is therefore bounded and the drain always terminates.
#[derive(Clone)]
pub struct RecoveryManager {
    store: Arc<dyn RecoveryStore>,
    max_attempts: u32,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn RecoveryStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Values below 1 are treated as 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Copy a failed job into the recovery table.
    ///
    /// The pending row is already gone (claimed); it is never re-inserted.
    pub async fn on_failure(
        &self,
        job: &Job,
        failure: &TrainingError,
    ) -> Result<RecoveryJob, StoreError> {
        warn!(job_id = %job.id, error = %failure, "job failed, moving to recovery");

        match self.store.push(NewRecoveryJob::from_failed(job)).await {
            Ok(entry) => {
                info!(
                    job_id = %job.id,
                    recovery_job_id = %entry.id,
                    user_id = %entry.user_id,
                    asset_id = %entry.asset_id,
                    model_type_id = %entry.model_type_id,
                    "recovery job recorded"
                );
                Ok(entry)
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record recovery job");
                Err(e)
            }
        }
    }

    /// Run the recovery table down to empty, FIFO.
    ///
    /// Only a fatal store error stops the pass early; everything else is
    /// logged and counted in the report.
    pub async fn drain(
        &self,
        executor: &TrainingExecutor,
        persister: &ArtifactPersister,
    ) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();

        while let Some(entry) = self.store.pop_oldest().await? {
            let job_ref = entry.job_ref();
            match executor.execute(&entry).await {
                Ok(artifact) => match persister.persist(artifact).await {
                    Ok(artifact_id) => {
                        info!(job = %job_ref, artifact_id = %artifact_id, "recovery job succeeded");
                        report.succeeded += 1;
                    }
                    Err(PersistError::Store(e)) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(job = %job_ref, error = %e, "recovery job trained but not stored");
                        report.not_stored += 1;
                    }
                },
                Err(failure) => {
                    let attempted = entry.attempts.saturating_add(1);
                    if attempted >= self.max_attempts {
                        error!(
                            job = %job_ref,
                            attempts = attempted,
                            error = %failure,
                            "recovery job abandoned"
                        );
                        report.abandoned += 1;
                        continue;
                    }

                    warn!(
                        job = %job_ref,
                        attempts = attempted,
                        error = %failure,
                        "recovery job failed again, requeued"
                    );
                    match self.store.push(NewRecoveryJob::retry_of(&entry)).await {
                        Ok(_) => report.requeued += 1,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            error!(job = %job_ref, error = %e, "failed to requeue recovery job");
                            report.abandoned += 1;
                        }
                    }
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            requeued = report.requeued,
            abandoned = report.abandoned,
            not_stored = report.not_stored,
            "recovery drain finished"
        );
        Ok(report)
    }
}

impl core::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{InMemoryArtifactStore, InMemoryModelTypeStore};
    use crate::jobs::executor::test_support::{FailAt, ScriptedBackend};
    use crate::jobs::store::InMemoryRecoveryStore;
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use typhoon_ai::BackendRegistry;
    use typhoon_core::{AssetId, JobId, ModelTypeId, TrainingTarget, UserId};

    struct Fixture {
        recovery: Arc<InMemoryRecoveryStore>,
        artifacts: Arc<InMemoryArtifactStore>,
        manager: RecoveryManager,
        executor: TrainingExecutor,
        persister: ArtifactPersister,
    }

    fn fixture(backend: ScriptedBackend) -> Fixture {
        let mut registry = BackendRegistry::new();
        registry.register_backend(ModelTypeId(1), backend);
        let recovery = InMemoryRecoveryStore::arc();
        let artifacts = InMemoryArtifactStore::arc();
        Fixture {
            manager: RecoveryManager::new(recovery.clone()),
            executor: TrainingExecutor::new(Arc::new(registry), InMemoryModelTypeStore::arc()),
            persister: ArtifactPersister::new(artifacts.clone()),
            recovery,
            artifacts,
        }
    }

    fn failed_job(asset: i64, model_type: i64) -> Job {
        Job {
            id: JobId::new(),
            user_id: UserId(4),
            asset_id: AssetId(asset),
            model_type_id: ModelTypeId(model_type),
            created_at: Utc::now(),
            priority: true,
        }
    }

    fn failure(job: &Job) -> TrainingError {
        TrainingError::ExecutionFailed {
            job: job.job_ref(),
            reason: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn on_failure_copies_the_target_without_priority() {
        let f = fixture(ScriptedBackend::succeeding("lstm"));
        let job = failed_job(9, 1);

        let entry = f.manager.on_failure(&job, &failure(&job)).await.unwrap();

        assert_eq!(entry.target(), job.target());
        assert_eq!(entry.attempts, 0);
        assert_eq!(f.recovery.recovery_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn drain_runs_entries_fifo_until_empty() {
        let f = fixture(ScriptedBackend::succeeding("lstm"));
        for asset in [3, 1, 2] {
            let job = failed_job(asset, 1);
            f.manager.on_failure(&job, &failure(&job)).await.unwrap();
        }

        let report = f.manager.drain(&f.executor, &f.persister).await.unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.processed(), 3);
        assert_eq!(f.recovery.recovery_count().await.unwrap(), 0);

        let assets: Vec<_> = f
            .artifacts
            .snapshot()
            .unwrap()
            .iter()
            .map(|a| a.asset_ref)
            .collect();
        assert_eq!(assets, vec![AssetId(3), AssetId(1), AssetId(2)]);
    }

    #[tokio::test]
    async fn permanently_failing_entries_are_abandoned_after_max_attempts() {
        let backend = ScriptedBackend::failing("lstm", FailAt::Fit);
        let builds = backend.builds.clone();
        let f = fixture(backend);
        let job = failed_job(1, 1);
        f.manager.on_failure(&job, &failure(&job)).await.unwrap();

        let report = f.manager.drain(&f.executor, &f.persister).await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS as usize);
        assert_eq!(report.requeued, DEFAULT_MAX_ATTEMPTS - 1);
        assert_eq!(report.abandoned, 1);
        assert_eq!(f.recovery.recovery_count().await.unwrap(), 0);
        assert!(f.artifacts.is_empty().unwrap());
    }

    #[tokio::test]
    async fn failing_entries_do_not_block_the_rest() {
        let f = fixture(
            ScriptedBackend::failing("lstm", FailAt::Build).failing_for(vec![AssetId(1)]),
        );
        for asset in [1, 2] {
            let job = failed_job(asset, 1);
            f.manager.on_failure(&job, &failure(&job)).await.unwrap();
        }

        let manager = f.manager.clone().with_max_attempts(2);
        let report = manager.drain(&f.executor, &f.persister).await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                succeeded: 1,
                requeued: 1,
                abandoned: 1,
                not_stored: 0,
            }
        );
    }

    #[tokio::test]
    async fn unknown_model_type_entries_are_bounded_too() {
        let f = fixture(ScriptedBackend::succeeding("lstm"));
        let job = failed_job(1, 99);
        f.manager.on_failure(&job, &failure(&job)).await.unwrap();

        let report = f.manager.drain(&f.executor, &f.persister).await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(f.artifacts.is_empty().unwrap());
    }

    #[tokio::test]
    async fn empty_table_is_a_no_op() {
        let f = fixture(ScriptedBackend::succeeding("lstm"));
        let report = f.manager.drain(&f.executor, &f.persister).await.unwrap();
        assert_eq!(report, DrainReport::default());
    }

    #[test]
    fn max_attempts_has_a_floor_of_one() {
        let manager = RecoveryManager::new(InMemoryRecoveryStore::arc()).with_max_attempts(0);
        assert_eq!(manager.max_attempts(), 1);
    }

    #[tokio::test]
    async fn retried_entries_keep_their_target() {
        let recovery = InMemoryRecoveryStore::arc();
        let entry = recovery
            .push(NewRecoveryJob {
                target: TrainingTarget::new(UserId(1), AssetId(2), ModelTypeId(3)),
                attempts: 1,
            })
            .await
            .unwrap();
        let retry = NewRecoveryJob::retry_of(&entry);
        assert_eq!(retry.target, entry.target());
        assert_eq!(retry.attempts, 2);
    }
}
