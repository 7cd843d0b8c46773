//! The broker-poll loop.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{LoopError, WorkerHandle, idle};
use crate::ingestion::IngestionAdapter;

const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(500);

/// Polls the broker one message at a time and hands each to the adapter.
#[derive(Debug)]
pub struct IngestionWorker {
    adapter: IngestionAdapter,
    idle_interval: Duration,
}

impl IngestionWorker {
    pub fn new(adapter: IngestionAdapter) -> Self {
        Self {
            adapter,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    /// Pause after an empty poll or a broker error.
    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Spawn the loop on the current runtime.
    ///
    /// Shutdown stops accepting messages; the one being handled completes.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle::new("ingestion", shutdown_tx, join)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), LoopError> {
        info!(worker = "ingestion", "worker started");

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let pause = match self.adapter.poll_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(LoopError::Broker(e)) => {
                    warn!(worker = "ingestion", error = %e, "broker poll failed");
                    true
                }
                Err(e) => {
                    error!(worker = "ingestion", error = %e, "worker stopping on fatal error");
                    return Err(e);
                }
            };

            if pause && idle(&mut shutdown, self.idle_interval).await {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreError;
    use crate::ingestion::{InMemoryBroker, InMemoryUserDirectory};
    use crate::jobs::{InMemoryJobStore, JobStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use typhoon_core::{AssetId, Job, JobSubmission, ModelTypeId, NewJob, UserId};

    fn submission(asset: i64) -> Vec<u8> {
        JobSubmission {
            user_id: UserId(1),
            asset_id: AssetId(asset),
            model_type_id: ModelTypeId(1),
        }
        .encode()
    }

    #[tokio::test]
    async fn ingests_until_shutdown() {
        let broker = InMemoryBroker::arc();
        let jobs = InMemoryJobStore::arc();
        let users = Arc::new(InMemoryUserDirectory::new().with_user(UserId(1), false));
        for asset in 0..3 {
            broker.publish(submission(asset)).unwrap();
        }

        let handle = IngestionWorker::new(IngestionAdapter::new(broker.clone(), jobs.clone(), users))
            .with_idle_interval(Duration::from_millis(5))
            .spawn();

        for _ in 0..200 {
            if jobs.pending_count().await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await.unwrap();

        assert_eq!(jobs.pending_count().await.unwrap(), 3);
        assert_eq!(broker.outstanding().unwrap(), 0);
    }

    struct LostConnection;

    #[async_trait]
    impl JobStore for LostConnection {
        async fn enqueue(&self, _job: NewJob) -> Result<Job, StoreError> {
            Err(StoreError::ConnectionLost("pool closed".to_string()))
        }

        async fn claim_oldest(&self, _priority: bool) -> Result<Option<Job>, StoreError> {
            Ok(None)
        }

        async fn pending_count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn fatal_store_errors_end_the_loop() {
        let broker = InMemoryBroker::arc();
        broker.publish(submission(1)).unwrap();
        let users = Arc::new(InMemoryUserDirectory::new().with_user(UserId(1), true));

        let mut handle =
            IngestionWorker::new(IngestionAdapter::new(broker, Arc::new(LostConnection), users))
                .spawn();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.finished())
            .await
            .unwrap();
        assert!(matches!(result, Err(LoopError::Store(StoreError::ConnectionLost(_)))));
    }
}
