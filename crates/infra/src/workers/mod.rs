//! Long-running loops and their control handles.

pub mod ingestion;
pub mod training;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::StoreError;
use crate::ingestion::BrokerError;

pub use ingestion::IngestionWorker;
pub use training::{CycleOutcome, TrainingService};

/// Why a loop stopped on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("loop task panicked: {0}")]
    Panicked(String),
}

/// Handle to control and join a spawned loop.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<Result<(), LoopError>>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        name: &'static str,
        shutdown: watch::Sender<bool>,
        join: JoinHandle<Result<(), LoopError>>,
    ) -> Self {
        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the loop to stop by itself.
    ///
    /// Cancel-safe, so it can sit in a `select!`. Once it has returned, later
    /// calls never complete; use [`WorkerHandle::shutdown`] to release the handle.
    pub async fn finished(&mut self) -> Result<(), LoopError> {
        let Some(join) = self.join.as_mut() else {
            return std::future::pending().await;
        };
        let result = join.await;
        self.join = None;
        flatten(self.name, result)
    }

    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// The in-flight message or job completes first.
    pub async fn shutdown(mut self) -> Result<(), LoopError> {
        let _ = self.shutdown.send(true);
        match self.join.take() {
            Some(join) => {
                let result = flatten(self.name, join.await);
                info!(worker = self.name, "worker stopped");
                result
            }
            None => Ok(()),
        }
    }
}

fn flatten(
    name: &'static str,
    result: Result<Result<(), LoopError>, tokio::task::JoinError>,
) -> Result<(), LoopError> {
    match result {
        Ok(inner) => inner,
        Err(e) => {
            error!(worker = name, error = %e, "worker task did not complete");
            Err(LoopError::Panicked(e.to_string()))
        }
    }
}

/// Sleep for `interval` unless shutdown is requested first.
///
/// Returns `true` when the loop should stop.
pub(crate) async fn idle(shutdown: &mut watch::Receiver<bool>, interval: std::time::Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
