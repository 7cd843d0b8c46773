//! The scheduler/executor loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use typhoon_core::{ArtifactId, JobId, RecoveryJobId};

use super::{LoopError, WorkerHandle, idle};
use crate::artifacts::{ArtifactPersister, PersistError};
use crate::jobs::{DrainReport, JobStore, PriorityScheduler, RecoveryManager, TrainingExecutor};

const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(500);

/// Result of one scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The pending queue was empty.
    Idle,
    /// A non-fatal store error; nothing was claimed.
    Skipped,
    Trained { job_id: JobId, artifact_id: ArtifactId },
    /// Trained, but the artifact write could not be confirmed. The job is lost.
    NotStored { job_id: JobId },
    /// Training failed; `recovery` is the recovery entry, if it could be written.
    Failed {
        job_id: JobId,
        recovery: Option<RecoveryJobId>,
    },
}

/// select-next → execute → persist-or-recover, one job at a time.
///
/// Owns its scheduler, so the priority streak is private to this service.
pub struct TrainingService {
    scheduler: PriorityScheduler<Arc<dyn JobStore>>,
    executor: TrainingExecutor,
    persister: ArtifactPersister,
    recovery: RecoveryManager,
    idle_interval: Duration,
    recovery_drain_interval: Option<Duration>,
    last_drain: Instant,
}

impl TrainingService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executor: TrainingExecutor,
        persister: ArtifactPersister,
        recovery: RecoveryManager,
    ) -> Self {
        Self {
            scheduler: PriorityScheduler::new(jobs),
            executor,
            persister,
            recovery,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            recovery_drain_interval: None,
            last_drain: Instant::now(),
        }
    }

    pub fn with_streak_limit(mut self, streak_limit: u32) -> Self {
        self.scheduler = self.scheduler.with_streak_limit(streak_limit);
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Drain the recovery table whenever the pending queue is empty and this
    /// much time has passed since the last drain. `None` disables it.
    pub fn with_recovery_drain_interval(mut self, interval: Option<Duration>) -> Self {
        self.recovery_drain_interval = interval;
        self
    }

    pub fn streak(&self) -> u32 {
        self.scheduler.streak()
    }

    /// Run one scheduling cycle.
    ///
    /// Only a fatal store error is returned as `Err`.
    pub async fn run_once(&mut self) -> Result<CycleOutcome, LoopError> {
        let job = match self.scheduler.select_next().await {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(CycleOutcome::Idle),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "job selection failed");
                return Ok(CycleOutcome::Skipped);
            }
        };

        info!(
            job_id = %job.id,
            user_id = %job.user_id,
            asset_id = %job.asset_id,
            model_type_id = %job.model_type_id,
            priority = job.priority,
            "training job"
        );

        match self.executor.execute(&job).await {
            Ok(artifact) => match self.persister.persist(artifact).await {
                Ok(artifact_id) => Ok(CycleOutcome::Trained {
                    job_id: job.id,
                    artifact_id,
                }),
                Err(PersistError::Store(e)) if e.is_fatal() => Err(e.into()),
                Err(_) => Ok(CycleOutcome::NotStored { job_id: job.id }),
            },
            Err(failure) => match self.recovery.on_failure(&job, &failure).await {
                Ok(entry) => Ok(CycleOutcome::Failed {
                    job_id: job.id,
                    recovery: Some(entry.id),
                }),
                Err(e) if e.is_fatal() => Err(e.into()),
                Err(_) => Ok(CycleOutcome::Failed {
                    job_id: job.id,
                    recovery: None,
                }),
            },
        }
    }

    /// Drain the recovery table now.
    pub async fn drain_recovery(&mut self) -> Result<DrainReport, LoopError> {
        self.last_drain = Instant::now();
        match self.recovery.drain(&self.executor, &self.persister).await {
            Ok(report) => Ok(report),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "recovery drain interrupted");
                Ok(DrainReport::default())
            }
        }
    }

    async fn drain_if_due(&mut self) -> Result<Option<DrainReport>, LoopError> {
        match self.recovery_drain_interval {
            Some(interval) if self.last_drain.elapsed() >= interval => {
                self.drain_recovery().await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Spawn the loop on the current runtime.
    ///
    /// Shutdown is observed between jobs; the in-flight job always completes.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle::new("training", shutdown_tx, join)
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), LoopError> {
        info!(
            worker = "training",
            idle_interval_ms = self.idle_interval.as_millis() as u64,
            "worker started"
        );

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let outcome = match self.run_once().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(worker = "training", error = %e, "worker stopping on fatal error");
                    return Err(e);
                }
            };

            if matches!(outcome, CycleOutcome::Idle | CycleOutcome::Skipped) {
                let drained = match self.drain_if_due().await {
                    Ok(report) => report.map(|r| r.processed()).unwrap_or(0),
                    Err(e) => {
                        error!(worker = "training", error = %e, "worker stopping on fatal error");
                        return Err(e);
                    }
                };
                if drained == 0 && idle(&mut shutdown, self.idle_interval).await {
                    return Ok(());
                }
            }
        }
    }
}

impl core::fmt::Debug for TrainingService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrainingService")
            .field("streak", &self.scheduler.streak())
            .field("executor", &self.executor)
            .field("recovery", &self.recovery)
            .field("idle_interval", &self.idle_interval)
            .field("recovery_drain_interval", &self.recovery_drain_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{InMemoryArtifactStore, InMemoryModelTypeStore};
    use crate::jobs::executor::test_support::{FailAt, ScriptedBackend};
    use crate::jobs::{InMemoryJobStore, InMemoryRecoveryStore, RecoveryStore};
    use typhoon_ai::BackendRegistry;
    use typhoon_core::{AssetId, ModelTypeId, NewJob, QueuedJob, TrainingTarget, UserId};

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        recovery: Arc<InMemoryRecoveryStore>,
        artifacts: Arc<InMemoryArtifactStore>,
        service: TrainingService,
    }

    fn fixture(backend: ScriptedBackend) -> Fixture {
        let mut registry = BackendRegistry::new();
        registry.register_backend(ModelTypeId(1), backend);
        let jobs = InMemoryJobStore::arc();
        let recovery = InMemoryRecoveryStore::arc();
        let artifacts = InMemoryArtifactStore::arc();
        let service = TrainingService::new(
            jobs.clone(),
            TrainingExecutor::new(Arc::new(registry), InMemoryModelTypeStore::arc()),
            ArtifactPersister::new(artifacts.clone()),
            RecoveryManager::new(recovery.clone()),
        )
        .with_idle_interval(Duration::from_millis(5));
        Fixture {
            jobs,
            recovery,
            artifacts,
            service,
        }
    }

    fn target(asset: i64, model_type: i64) -> TrainingTarget {
        TrainingTarget::new(UserId(1), AssetId(asset), ModelTypeId(model_type))
    }

    #[tokio::test]
    async fn successful_cycle_persists_an_artifact() {
        let mut f = fixture(ScriptedBackend::succeeding("lstm"));
        let job = f.jobs.enqueue(NewJob::priority(target(1, 1))).await.unwrap();

        let outcome = f.service.run_once().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Trained { job_id, .. } if job_id == job.id));
        assert_eq!(f.artifacts.len().unwrap(), 1);
        assert_eq!(f.jobs.pending_count().await.unwrap(), 0);
        assert_eq!(f.service.run_once().await.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn failed_cycle_creates_exactly_one_matching_recovery_job() {
        let mut f = fixture(ScriptedBackend::failing("lstm", FailAt::Fit));
        f.jobs.enqueue(NewJob::normal(target(7, 1))).await.unwrap();

        let outcome = f.service.run_once().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed { recovery: Some(_), .. }));
        let entries = f.recovery.snapshot().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target(), target(7, 1));
        assert!(f.artifacts.is_empty().unwrap());
        assert_eq!(f.jobs.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn service_owns_its_streak() {
        let mut f = fixture(ScriptedBackend::succeeding("lstm"));
        for asset in 0..2 {
            f.jobs.enqueue(NewJob::priority(target(asset, 1))).await.unwrap();
        }
        f.service.run_once().await.unwrap();
        f.service.run_once().await.unwrap();
        assert_eq!(f.service.streak(), 2);
    }

    #[tokio::test]
    async fn idle_loop_drains_recovery_when_due() {
        let f = fixture(ScriptedBackend::succeeding("lstm"));
        f.recovery
            .push(typhoon_core::NewRecoveryJob {
                target: target(3, 1),
                attempts: 0,
            })
            .await
            .unwrap();

        let handle = f
            .service
            .with_recovery_drain_interval(Some(Duration::from_millis(1)))
            .spawn();

        let mut drained = false;
        for _ in 0..200 {
            if f.artifacts.len().unwrap() == 1 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await.unwrap();

        assert!(drained);
        assert_eq!(f.recovery.recovery_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_loop() {
        let f = fixture(ScriptedBackend::succeeding("lstm"));
        let handle = f.service.spawn();
        assert_eq!(handle.name(), "training");

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap()
            .unwrap();
    }
}
