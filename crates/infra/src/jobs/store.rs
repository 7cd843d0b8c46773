//! Queue storage abstractions and in-memory implementations.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use typhoon_core::{Job, NewJob, NewRecoveryJob, RecoveryJob};

use crate::db::StoreError;

/// Pending job queue.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Durably insert a new job; the store assigns `id` and `created_at`.
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Atomically select and remove the oldest job of one priority class.
    ///
    /// Two concurrent callers never receive the same row.
    async fn claim_oldest(&self, priority: bool) -> Result<Option<Job>, StoreError>;

    async fn pending_count(&self) -> Result<u64, StoreError>;
}

/// Recovery queue (always drained FIFO).
#[async_trait]
pub trait RecoveryStore: Send + Sync + 'static {
    async fn push(&self, job: NewRecoveryJob) -> Result<RecoveryJob, StoreError>;

    /// Atomically select and remove the oldest recovery entry.
    async fn pop_oldest(&self) -> Result<Option<RecoveryJob>, StoreError>;

    async fn recovery_count(&self) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T> JobStore for Arc<T>
where
    T: JobStore + ?Sized,
{
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        (**self).enqueue(job).await
    }

    async fn claim_oldest(&self, priority: bool) -> Result<Option<Job>, StoreError> {
        (**self).claim_oldest(priority).await
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        (**self).pending_count().await
    }
}

#[async_trait]
impl<T> RecoveryStore for Arc<T>
where
    T: RecoveryStore + ?Sized,
{
    async fn push(&self, job: NewRecoveryJob) -> Result<RecoveryJob, StoreError> {
        (**self).push(job).await
    }

    async fn pop_oldest(&self) -> Result<Option<RecoveryJob>, StoreError> {
        (**self).pop_oldest().await
    }

    async fn recovery_count(&self) -> Result<u64, StoreError> {
        (**self).recovery_count().await
    }
}

/// Rows tagged with an insertion sequence so `created_at` ties resolve FIFO.
#[derive(Debug)]
struct Sequenced<T> {
    rows: Vec<(u64, T)>,
    next_seq: u64,
}

impl<T> Default for Sequenced<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<T> Sequenced<T> {
    fn push(&mut self, row: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rows.push((seq, row));
    }

    fn take_oldest<F, P>(&mut self, created_at: F, pred: P) -> Option<T>
    where
        F: Fn(&T) -> DateTime<Utc>,
        P: Fn(&T) -> bool,
    {
        let idx = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, (_, row))| pred(row))
            .min_by_key(|(_, (seq, row))| (created_at(row), *seq))
            .map(|(idx, _)| idx)?;
        Some(self.rows.remove(idx).1)
    }
}

/// In-memory pending queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Sequenced<Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert a fully-formed row (explicit id and `created_at`).
    pub fn insert_job(&self, job: Job) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::poisoned("job store"))?;
        if inner.rows.iter().any(|(_, j)| j.id == job.id) {
            return Err(StoreError::Constraint(format!("job {} already exists", job.id)));
        }
        inner.push(job);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::poisoned("job store"))?;
        Ok(inner.rows.iter().map(|(_, j)| j.clone()).collect())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        let job = job.into_job(Utc::now());
        self.insert_job(job.clone())?;
        Ok(job)
    }

    async fn claim_oldest(&self, priority: bool) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::poisoned("job store"))?;
        Ok(inner.take_oldest(|j| j.created_at, |j| j.priority == priority))
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::poisoned("job store"))?;
        Ok(inner.rows.len() as u64)
    }
}

/// In-memory recovery queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRecoveryStore {
    inner: Mutex<Sequenced<RecoveryJob>>,
}

impl InMemoryRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn snapshot(&self) -> Result<Vec<RecoveryJob>, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("recovery store"))?;
        Ok(inner.rows.iter().map(|(_, j)| j.clone()).collect())
    }
}

#[async_trait]
impl RecoveryStore for InMemoryRecoveryStore {
    async fn push(&self, job: NewRecoveryJob) -> Result<RecoveryJob, StoreError> {
        let row = job.into_recovery_job(Utc::now());
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("recovery store"))?;
        inner.push(row.clone());
        Ok(row)
    }

    async fn pop_oldest(&self) -> Result<Option<RecoveryJob>, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("recovery store"))?;
        Ok(inner.take_oldest(|j| j.created_at, |_| true))
    }

    async fn recovery_count(&self) -> Result<u64, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::poisoned("recovery store"))?;
        Ok(inner.rows.len() as u64)
    }
}
