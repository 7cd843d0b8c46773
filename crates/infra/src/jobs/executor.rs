//! Training executor: drives a model backend for one job.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use typhoon_ai::{BackendError, BackendRegistry, FitHistory, FitOptions, Metrics, WindowSplit};
use typhoon_core::{
    ArtifactId, ArtifactStatus, JobRef, ModelTypeId, QueuedJob, TrainedArtifact,
};

use crate::artifacts::store::ModelTypeStore;
use crate::db::StoreError;

/// Why a job produced no artifact. Every variant routes the job to recovery.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("{job}: no backend registered for model type {model_type_id}")]
    NoSuchModelType {
        job: JobRef,
        model_type_id: ModelTypeId,
    },

    #[error("{job}: model construction failed: {source}")]
    BuildFailed {
        job: JobRef,
        #[source]
        source: BackendError,
    },

    #[error("{job}: training failed: {reason}")]
    ExecutionFailed { job: JobRef, reason: String },

    #[error("{job}: model type catalog unavailable: {source}")]
    Persistence {
        job: JobRef,
        #[source]
        source: StoreError,
    },
}

impl TrainingError {
    pub fn job(&self) -> JobRef {
        match self {
            TrainingError::NoSuchModelType { job, .. }
            | TrainingError::BuildFailed { job, .. }
            | TrainingError::ExecutionFailed { job, .. }
            | TrainingError::Persistence { job, .. } => *job,
        }
    }
}

/// Output of the CPU-bound part of a run.
struct Fitted {
    history: FitHistory,
    validation: Metrics,
    test: Metrics,
    bytes: Vec<u8>,
}

/// Orchestrates build → fit → evaluate → describe → serialize for one job.
///
/// Holds no state across jobs and never retries; retry belongs to the
/// recovery manager.
pub struct TrainingExecutor {
    registry: Arc<BackendRegistry>,
    model_types: Arc<dyn ModelTypeStore>,
    fit: FitOptions,
}

impl TrainingExecutor {
    pub fn new(registry: Arc<BackendRegistry>, model_types: Arc<dyn ModelTypeStore>) -> Self {
        Self {
            registry,
            model_types,
            fit: FitOptions::default(),
        }
    }

    pub fn with_fit_options(mut self, fit: FitOptions) -> Self {
        self.fit = fit;
        self
    }

    pub fn fit_options(&self) -> FitOptions {
        self.fit
    }

    pub async fn execute<J>(&self, job: &J) -> Result<TrainedArtifact, TrainingError>
    where
        J: QueuedJob + ?Sized,
    {
        let job_ref = job.job_ref();
        let target = job.target();

        let backend = self.registry.get_backend(target.model_type_id).ok_or(
            TrainingError::NoSuchModelType {
                job: job_ref,
                model_type_id: target.model_type_id,
            },
        )?;

        let mut model = backend
            .build(target.asset_id)
            .await
            .map_err(|source| TrainingError::BuildFailed {
                job: job_ref,
                source,
            })?;
        debug!(job = %job_ref, asset_id = %target.asset_id, "model built");

        let fit = self.fit;
        let fitted = tokio::task::spawn_blocking(move || -> Result<Fitted, BackendError> {
            let history = model.compile_and_fit(&fit)?;
            let validation = model.evaluate(WindowSplit::Validation)?;
            let test = model.evaluate(WindowSplit::Test)?;
            let bytes = model.serialize()?;
            Ok(Fitted {
                history,
                validation,
                test,
                bytes,
            })
        })
        .await
        .map_err(|e| TrainingError::ExecutionFailed {
            job: job_ref,
            reason: format!("backend task aborted: {}", e),
        })?
        .map_err(|e| TrainingError::ExecutionFailed {
            job: job_ref,
            reason: e.to_string(),
        })?;

        let description = backend.describe();
        let descriptor = self
            .model_types
            .ensure(&description)
            .await
            .map_err(|source| TrainingError::Persistence {
                job: job_ref,
                source,
            })?;

        info!(
            job = %job_ref,
            model = %description.name,
            epochs = fitted.history.epochs_run(),
            stopped_early = fitted.history.stopped_early,
            best_val_loss = fitted.history.best_val_loss().unwrap_or(f64::NAN),
            "model trained"
        );

        Ok(TrainedArtifact {
            id: ArtifactId::new(),
            model_type_ref: descriptor.id,
            user_ref: target.user_id,
            asset_ref: target.asset_id,
            name: description.name,
            created_at: Utc::now(),
            performance_metrics: fitted.test.to_json(),
            hyperparameters: description.default_hyperparameters,
            architecture_descriptor: description.default_architecture,
            serialized_bytes: fitted.bytes,
            validation_metrics: fitted.validation.to_json(),
            status: ArtifactStatus::Temporal,
        })
    }
}

impl core::fmt::Debug for TrainingExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrainingExecutor")
            .field("registry", &self.registry)
            .field("fit", &self.fit)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted backends shared by executor, recovery and pipeline tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use typhoon_ai::{
        BackendError, FitHistory, FitOptions, Metrics, ModelBackend, ModelDescription,
        TrainableModel, WindowSplit,
    };
    use typhoon_core::AssetId;

    /// Where a scripted model fails, if anywhere.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailAt {
        Nowhere,
        Build,
        Fit,
        Evaluate,
        Serialize,
        Panic,
    }

    pub struct ScriptedBackend {
        pub name: &'static str,
        pub fail_at: FailAt,
        /// Assets for which the run fails at `fail_at`; empty means all assets.
        pub failing_assets: Vec<AssetId>,
        pub builds: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        pub fn succeeding(name: &'static str) -> Self {
            Self {
                name,
                fail_at: FailAt::Nowhere,
                failing_assets: Vec::new(),
                builds: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing(name: &'static str, fail_at: FailAt) -> Self {
            Self {
                fail_at,
                ..Self::succeeding(name)
            }
        }

        pub fn failing_for(mut self, assets: Vec<AssetId>) -> Self {
            self.failing_assets = assets;
            self
        }

        fn fails_for(&self, asset_id: AssetId) -> FailAt {
            if self.failing_assets.is_empty() || self.failing_assets.contains(&asset_id) {
                self.fail_at
            } else {
                FailAt::Nowhere
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn describe(&self) -> ModelDescription {
            ModelDescription {
                name: self.name.to_string(),
                description: format!("scripted {}", self.name),
                default_hyperparameters: json!({"units": 50}),
                default_architecture: json!({"layers": {"layer1": "Dense(1)"}}),
            }
        }

        async fn build(&self, asset_id: AssetId) -> Result<Box<dyn TrainableModel>, BackendError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let fail_at = self.fails_for(asset_id);
            if fail_at == FailAt::Build {
                return Err(BackendError::InsufficientData(format!(
                    "no history for asset {asset_id}"
                )));
            }
            Ok(Box::new(ScriptedModel { asset_id, fail_at }))
        }
    }

    struct ScriptedModel {
        asset_id: AssetId,
        fail_at: FailAt,
    }

    impl TrainableModel for ScriptedModel {
        fn compile_and_fit(&mut self, options: &FitOptions) -> Result<FitHistory, BackendError> {
            match self.fail_at {
                FailAt::Fit => Err(BackendError::Training("loss diverged".to_string())),
                FailAt::Panic => panic!("scripted backend panic"),
                _ => Ok(FitHistory {
                    loss: vec![1.0; options.epochs.min(2) as usize],
                    val_loss: vec![1.5; options.epochs.min(2) as usize],
                    stopped_early: false,
                }),
            }
        }

        fn evaluate(&self, split: WindowSplit) -> Result<Metrics, BackendError> {
            if self.fail_at == FailAt::Evaluate {
                return Err(BackendError::Training("evaluation failed".to_string()));
            }
            let loss = match split {
                WindowSplit::Train => 0.1,
                WindowSplit::Validation => 0.2,
                WindowSplit::Test => 0.3,
            };
            Ok(Metrics::new()
                .with("loss", loss)
                .with("mean_absolute_error", loss / 2.0))
        }

        fn serialize(&self) -> Result<Vec<u8>, BackendError> {
            if self.fail_at == FailAt::Serialize {
                return Err(BackendError::Serialization("not serializable".to_string()));
            }
            Ok(format!("model-for-{}", self.asset_id).into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FailAt, ScriptedBackend};
    use super::*;
    use crate::artifacts::store::InMemoryModelTypeStore;
    use serde_json::json;
    use typhoon_core::{AssetId, Job, JobId, NewRecoveryJob, TrainingTarget, UserId};

    fn job(model_type: i64) -> Job {
        Job {
            id: JobId::new(),
            user_id: UserId(7),
            asset_id: AssetId(3),
            model_type_id: ModelTypeId(model_type),
            created_at: Utc::now(),
            priority: true,
        }
    }

    fn executor_with(backend: ScriptedBackend) -> (TrainingExecutor, Arc<InMemoryModelTypeStore>) {
        let mut registry = BackendRegistry::new();
        registry.register_backend(ModelTypeId(1), backend);
        let model_types = InMemoryModelTypeStore::arc();
        let executor = TrainingExecutor::new(Arc::new(registry), model_types.clone());
        (executor, model_types)
    }

    #[tokio::test]
    async fn successful_run_builds_a_temporal_artifact() {
        let (executor, model_types) = executor_with(ScriptedBackend::succeeding("lstm"));
        let job = job(1);

        let artifact = executor.execute(&job).await.unwrap();

        assert_eq!(artifact.status, ArtifactStatus::Temporal);
        assert_eq!(artifact.user_ref, UserId(7));
        assert_eq!(artifact.asset_ref, AssetId(3));
        assert_eq!(artifact.name, "lstm");
        assert_eq!(artifact.serialized_bytes, b"model-for-3".to_vec());
        assert_eq!(artifact.validation_metrics, json!({"loss": 0.2, "mean_absolute_error": 0.1}));
        assert_eq!(artifact.performance_metrics, json!({"loss": 0.3, "mean_absolute_error": 0.15}));
        assert_eq!(artifact.hyperparameters, json!({"units": 50}));

        let descriptor = model_types.get_by_name("lstm").await.unwrap().unwrap();
        assert_eq!(artifact.model_type_ref, descriptor.id);
    }

    #[tokio::test]
    async fn descriptor_is_created_once_per_kind() {
        let (executor, model_types) = executor_with(ScriptedBackend::succeeding("lstm"));

        let first = executor.execute(&job(1)).await.unwrap();
        let second = executor.execute(&job(1)).await.unwrap();

        assert_eq!(first.model_type_ref, second.model_type_ref);
        assert_eq!(model_types.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_model_type() {
        let (executor, model_types) = executor_with(ScriptedBackend::succeeding("lstm"));
        let job = job(42);

        let err = executor.execute(&job).await.unwrap_err();
        assert!(matches!(
            err,
            TrainingError::NoSuchModelType { model_type_id: ModelTypeId(42), .. }
        ));
        assert_eq!(err.job(), job.job_ref());
        assert_eq!(model_types.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn build_failures_are_classified_as_build_failed() {
        let (executor, _) = executor_with(ScriptedBackend::failing("lstm", FailAt::Build));
        let err = executor.execute(&job(1)).await.unwrap_err();
        assert!(matches!(err, TrainingError::BuildFailed { .. }));
    }

    #[tokio::test]
    async fn fit_evaluate_and_serialize_failures_are_execution_failures() {
        for fail_at in [FailAt::Fit, FailAt::Evaluate, FailAt::Serialize, FailAt::Panic] {
            let (executor, model_types) = executor_with(ScriptedBackend::failing("lstm", fail_at));
            let err = executor.execute(&job(1)).await.unwrap_err();
            assert!(
                matches!(err, TrainingError::ExecutionFailed { .. }),
                "{fail_at:?} gave {err:?}"
            );
            // A failed run never registers its model kind.
            assert_eq!(model_types.len().unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn recovery_jobs_run_like_pending_jobs() {
        let (executor, _) = executor_with(ScriptedBackend::succeeding("lstm"));
        let recovery = NewRecoveryJob {
            target: TrainingTarget::new(UserId(7), AssetId(9), ModelTypeId(1)),
            attempts: 1,
        }
        .into_recovery_job(Utc::now());

        let artifact = executor.execute(&recovery).await.unwrap();
        assert_eq!(artifact.asset_ref, AssetId(9));
    }

    #[tokio::test]
    async fn fit_options_reach_the_backend() {
        let (executor, _) = executor_with(ScriptedBackend::succeeding("lstm"));
        let executor = executor.with_fit_options(FitOptions {
            epochs: 1,
            patience: 0,
        });
        assert_eq!(executor.fit_options().epochs, 1);
        executor.execute(&job(1)).await.unwrap();
    }
}
