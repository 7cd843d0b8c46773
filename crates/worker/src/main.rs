use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use typhoon_ai::{BackendRegistry, LinearTrendBackend};
use typhoon_infra::ai::PostgresPriceHistory;
use typhoon_infra::artifacts::{ArtifactPersister, PostgresArtifactStore, PostgresModelTypeStore};
use typhoon_infra::ingestion::{IngestionAdapter, PostgresUserDirectory, RedisStreamsSource};
use typhoon_infra::jobs::{
    PostgresJobStore, PostgresRecoveryStore, RecoveryManager, TrainingExecutor,
};
use typhoon_infra::workers::{IngestionWorker, TrainingService};
use typhoon_infra::{WorkerConfig, WorkerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    typhoon_observability::init();

    let config = WorkerConfig::from_env().context("reading worker configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("connecting to postgres")?;

    let jobs = Arc::new(PostgresJobStore::new(pool.clone()));
    let recovery = Arc::new(PostgresRecoveryStore::new(pool.clone()));
    let artifacts = Arc::new(PostgresArtifactStore::new(pool.clone()));
    let model_types = Arc::new(PostgresModelTypeStore::new(pool.clone()));
    let users = Arc::new(PostgresUserDirectory::new(pool.clone()));
    let history = Arc::new(PostgresPriceHistory::new(pool));

    let mut registry = BackendRegistry::new();
    registry.register_backend(
        config.linear_trend_model_type_id,
        LinearTrendBackend::new(history),
    );

    let source = RedisStreamsSource::connect(&config.redis_url, config.stream.clone())
        .await
        .context("connecting to the submission stream")?;

    let ingestion = IngestionWorker::new(IngestionAdapter::new(
        Arc::new(source),
        jobs.clone(),
        users,
    ))
    .with_idle_interval(config.idle_interval)
    .spawn();

    let training = TrainingService::new(
        jobs,
        TrainingExecutor::new(Arc::new(registry), model_types).with_fit_options(config.fit),
        ArtifactPersister::new(artifacts),
        RecoveryManager::new(recovery).with_max_attempts(config.recovery_max_attempts),
    )
    .with_streak_limit(config.streak_limit)
    .with_idle_interval(config.idle_interval)
    .with_recovery_drain_interval(config.recovery_drain_interval)
    .spawn();

    tracing::info!(
        stream = %config.stream.stream_key,
        group = %config.stream.group,
        consumer = %config.stream.consumer,
        streak_limit = config.streak_limit,
        "typhoon worker running"
    );

    run_until_stopped(ingestion, training).await
}

/// Wait for ctrl-c or for either loop to stop, then stop the other one.
async fn run_until_stopped(
    mut ingestion: WorkerHandle,
    mut training: WorkerHandle,
) -> anyhow::Result<()> {
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            tracing::info!("shutdown requested");
            None
        }
        result = ingestion.finished() => Some(("ingestion", result)),
        result = training.finished() => Some(("training", result)),
    };

    let ingestion_result = ingestion.shutdown().await;
    let training_result = training.shutdown().await;

    if let Some((name, Err(e))) = early_exit {
        return Err(e).with_context(|| format!("{name} loop failed"));
    }
    ingestion_result.context("ingestion loop failed")?;
    training_result.context("training loop failed")?;

    tracing::info!("typhoon worker stopped");
    Ok(())
}
