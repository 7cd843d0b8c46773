use std::sync::Arc;

use tracing::{debug, error, info, warn};

use typhoon_core::{JobId, JobSubmission, NewJob, UserId};

use super::broker::{Delivery, SubmissionSource};
use super::users::UserDirectory;
use crate::db::StoreError;
use crate::jobs::JobStore;
use crate::workers::LoopError;

/// What happened to one delivery. Only `Enqueued` was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Enqueued(JobId),
    Undecodable,
    UnknownUser(UserId),
    /// The lookup or insert failed; the broker will redeliver.
    NotPersisted,
}

/// Turns submission messages into pending jobs.
///
/// A message is acknowledged only after its job row is durably inserted, so
/// delivery into the job store is at-least-once. Every failure path leaves
/// the message unacknowledged for the broker to redeliver or dead-letter.
#[derive(Clone)]
pub struct IngestionAdapter {
    source: Arc<dyn SubmissionSource>,
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserDirectory>,
}

impl IngestionAdapter {
    pub fn new(
        source: Arc<dyn SubmissionSource>,
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            source,
            jobs,
            users,
        }
    }

    /// Poll once and handle the message, if any.
    pub async fn poll_once(&self) -> Result<Option<IngestOutcome>, LoopError> {
        let Some(delivery) = self.source.poll().await? else {
            return Ok(None);
        };
        Ok(Some(self.handle(&delivery).await?))
    }

    /// Decode, look up the submitter, insert, then acknowledge.
    ///
    /// Returns `Err` only for a fatal store error.
    pub async fn handle(&self, delivery: &Delivery) -> Result<IngestOutcome, StoreError> {
        let submission = match JobSubmission::decode(&delivery.payload) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(
                    message_id = %delivery.id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "undecodable submission left unacknowledged"
                );
                return Ok(IngestOutcome::Undecodable);
            }
        };

        let priority = match self.users.priority_of(submission.user_id).await {
            Ok(Some(priority)) => priority,
            Ok(None) => {
                warn!(
                    message_id = %delivery.id,
                    user_id = %submission.user_id,
                    "submission from unknown user left unacknowledged"
                );
                return Ok(IngestOutcome::UnknownUser(submission.user_id));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(message_id = %delivery.id, error = %e, "user lookup failed");
                return Ok(IngestOutcome::NotPersisted);
            }
        };

        let job = match self
            .jobs
            .enqueue(NewJob::new(submission.target(), priority))
            .await
        {
            Ok(job) => job,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(message_id = %delivery.id, error = %e, "job insert failed");
                return Ok(IngestOutcome::NotPersisted);
            }
        };

        info!(
            job_id = %job.id,
            user_id = %job.user_id,
            asset_id = %job.asset_id,
            model_type_id = %job.model_type_id,
            priority = job.priority,
            "job enqueued"
        );

        if let Err(e) = self.source.ack(delivery).await {
            // The row is durable; redelivery will produce a duplicate job.
            warn!(message_id = %delivery.id, job_id = %job.id, error = %e, "ack failed");
        } else {
            debug!(message_id = %delivery.id, "submission acknowledged");
        }

        Ok(IngestOutcome::Enqueued(job.id))
    }
}

impl core::fmt::Debug for IngestionAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IngestionAdapter").finish_non_exhaustive()
    }
}
