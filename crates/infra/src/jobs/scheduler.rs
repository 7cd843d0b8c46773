use tracing::debug;

use typhoon_core::Job;

use super::store::JobStore;
use crate::db::StoreError;

/// Consecutive priority dequeues after which normal jobs are preferred.
pub const DEFAULT_STREAK_LIMIT: u32 = 5;

/// Selects the next job under a leaky-bucket anti-starvation policy.
///
/// While the priority streak is below the limit, the oldest priority job is
/// preferred; once it reaches the limit, the oldest normal job is preferred.
/// Either way the scheduler falls back to the other class rather than
/// returning nothing. A normal selection resets the streak.
///
/// The streak is private to one scheduler instance; independent schedulers
/// over the same store each keep their own.
#[derive(Debug)]
pub struct PriorityScheduler<S> {
    store: S,
    streak: u32,
    streak_limit: u32,
}

impl<S: JobStore> PriorityScheduler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            streak: 0,
            streak_limit: DEFAULT_STREAK_LIMIT,
        }
    }

    pub fn with_streak_limit(mut self, streak_limit: u32) -> Self {
        self.streak_limit = streak_limit;
        self
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim the next job, or `None` when both classes are empty.
    ///
    /// Store errors leave the streak untouched.
    pub async fn select_next(&mut self) -> Result<Option<Job>, StoreError> {
        let prefer_priority = self.streak < self.streak_limit;

        let job = match self.store.claim_oldest(prefer_priority).await? {
            Some(job) => Some(job),
            None => self.store.claim_oldest(!prefer_priority).await?,
        };

        if let Some(job) = &job {
            self.streak = if job.priority {
                self.streak.saturating_add(1)
            } else {
                0
            };
            debug!(
                job_id = %job.id,
                priority = job.priority,
                streak = self.streak,
                "job selected"
            );
        }

        Ok(job)
    }
}
