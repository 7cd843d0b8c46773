//! Redis Streams submission source (consumer group, manual XACK).
//!
//! ## Delivery policy
//!
//! - New entries are read with `XREADGROUP ... BLOCK`, one at a time.
//! - Entries left pending longer than `pending_idle` (crashed consumer or
//!   unacknowledged failure) are reclaimed with `XPENDING IDLE` + `XCLAIM`
//!   before new entries are read.
//! - An entry already delivered `max_deliveries` times is copied to the
//!   dead-letter stream and acknowledged instead of being handed out again.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::broker::{BrokerError, Delivery, SubmissionSource};
use crate::config::StreamSettings;

/// Stream entry field holding the submission JSON.
pub const PAYLOAD_FIELD: &str = "payload";

pub struct RedisStreamsSource {
    client: redis::Client,
    settings: StreamSettings,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStreamsSource {
    /// Connect and make sure the consumer group exists.
    ///
    /// Failing here is a startup error; later connection losses reconnect lazily.
    pub async fn connect(redis_url: &str, settings: StreamSettings) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        let source = Self {
            client,
            settings,
            conn: Mutex::new(None),
        };
        source.ensure_consumer_group().await?;
        Ok(source)
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Publish a submission payload (used by producers and tests).
    pub async fn publish(&self, payload: &[u8]) -> Result<String, BrokerError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(&self.settings.stream_key)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await;
        self.check(result, "XADD")
    }

    async fn ensure_consumer_group(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.settings.stream_key,
                    group = %self.settings.group,
                    "consumer group created"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(self.classify(e, "XGROUP CREATE")),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn classify(&self, err: redis::RedisError, command: &str) -> BrokerError {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            // Drop the cached connection so the next call reconnects.
            if let Ok(mut guard) = self.conn.try_lock() {
                *guard = None;
            }
            BrokerError::Connection(format!("{} failed: {}", command, err))
        } else {
            BrokerError::Command(format!("{} failed: {}", command, err))
        }
    }

    fn check<T>(&self, result: redis::RedisResult<T>, command: &str) -> Result<T, BrokerError> {
        result.map_err(|e| self.classify(e, command))
    }

    /// Oldest entry of this group idle longer than `pending_idle`, if any.
    async fn oldest_stale(&self) -> Result<Option<(String, u32)>, BrokerError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<StreamPendingCountReply> = redis::cmd("XPENDING")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg("IDLE")
            .arg(self.idle_ms())
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await;
        let reply = self.check(result, "XPENDING")?;

        Ok(reply.ids.into_iter().next().map(|pending| {
            let times = u32::try_from(pending.times_delivered).unwrap_or(u32::MAX);
            (pending.id, times)
        }))
    }

    /// Take ownership of a stale entry; `None` if another consumer got it first.
    async fn claim(&self, id: &str) -> Result<Option<StreamId>, BrokerError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<StreamClaimReply> = redis::cmd("XCLAIM")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg(self.idle_ms())
            .arg(id)
            .query_async(&mut conn)
            .await;
        Ok(self.check(result, "XCLAIM")?.ids.into_iter().next())
    }

    #[instrument(skip(self, entry), fields(message_id = %entry.id), err)]
    async fn dead_letter(&self, entry: &StreamId, deliveries: u32) -> Result<(), BrokerError> {
        let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
        let mut conn = self.connection().await?;

        let added: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(&self.settings.dead_letter_key)
            .arg("*")
            .arg("original_message_id")
            .arg(&entry.id)
            .arg("delivery_count")
            .arg(deliveries)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await;
        self.check(added, "DLQ XADD")?;
        self.ack_id(&entry.id).await?;

        warn!(
            message_id = %entry.id,
            deliveries,
            dead_letter_stream = %self.settings.dead_letter_key,
            "message exceeded delivery limit, dead-lettered"
        );
        Ok(())
    }

    /// Record an unclaimable pending id in the dead-letter stream and ack it.
    #[instrument(skip(self, reason), err)]
    async fn discard_unclaimable(
        &self,
        message_id: &str,
        deliveries: u32,
        reason: &str,
    ) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let added: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(&self.settings.dead_letter_key)
            .arg("*")
            .arg("original_message_id")
            .arg(message_id)
            .arg("delivery_count")
            .arg(deliveries)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("error")
            .arg(reason)
            .query_async(&mut conn)
            .await;
        self.check(added, "DLQ XADD")?;
        self.ack_id(message_id).await?;

        warn!(
            message_id,
            deliveries,
            error = %reason,
            "pending message could not be claimed, discarded"
        );
        Ok(())
    }

    async fn read_new(&self) -> Result<Option<StreamId>, BrokerError> {
        let mut conn = self.connection().await?;
        let block_ms = u64::try_from(self.settings.block.as_millis()).unwrap_or(u64::MAX);
        let result: redis::RedisResult<Option<StreamReadReply>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.settings.stream_key)
            .arg(">")
            .query_async(&mut conn)
            .await;

        Ok(self
            .check(result, "XREADGROUP")?
            .and_then(|reply| reply.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next()))
    }

    async fn ack_id(&self, id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = redis::cmd("XACK")
            .arg(&self.settings.stream_key)
            .arg(&self.settings.group)
            .arg(id)
            .query_async(&mut conn)
            .await;
        self.check(result, "XACK").map(|_| ())
    }

    fn idle_ms(&self) -> u64 {
        u64::try_from(self.settings.pending_idle.as_millis()).unwrap_or(u64::MAX)
    }
}

/// What to do with the oldest stale pending entry after trying to claim it.
#[derive(Debug)]
enum StaleDisposition {
    Deliver(StreamId),
    DeadLetter(StreamId),
    /// The entry cannot be claimed (trimmed or unparsable); drop it from the
    /// pending list so it stops blocking new reads.
    Discard(String),
    /// Another consumer claimed it first.
    TakenElsewhere,
    Fail(BrokerError),
}

fn stale_disposition(
    claimed: Result<Option<StreamId>, BrokerError>,
    times_delivered: u32,
    max_deliveries: u32,
) -> StaleDisposition {
    match claimed {
        Ok(Some(entry)) if times_delivered >= max_deliveries => StaleDisposition::DeadLetter(entry),
        Ok(Some(entry)) => StaleDisposition::Deliver(entry),
        Ok(None) => StaleDisposition::TakenElsewhere,
        Err(BrokerError::Command(reason)) => StaleDisposition::Discard(reason),
        Err(e @ BrokerError::Connection(_)) => StaleDisposition::Fail(e),
    }
}

fn delivery_from(entry: StreamId, delivery_count: u32) -> Delivery {
    // A missing payload field decodes as an empty (undecodable) message.
    let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    Delivery {
        id: entry.id,
        payload,
        delivery_count,
    }
}

#[async_trait]
impl SubmissionSource for RedisStreamsSource {
    async fn poll(&self) -> Result<Option<Delivery>, BrokerError> {
        while let Some((id, times_delivered)) = self.oldest_stale().await? {
            let claimed = self.claim(&id).await;
            match stale_disposition(claimed, times_delivered, self.settings.max_deliveries) {
                StaleDisposition::Deliver(entry) => {
                    debug!(message_id = %entry.id, deliveries = times_delivered + 1, "reclaimed stale message");
                    return Ok(Some(delivery_from(entry, times_delivered.saturating_add(1))));
                }
                StaleDisposition::DeadLetter(entry) => {
                    self.dead_letter(&entry, times_delivered).await?;
                }
                StaleDisposition::Discard(reason) => {
                    self.discard_unclaimable(&id, times_delivered, &reason).await?;
                }
                StaleDisposition::TakenElsewhere => break,
                StaleDisposition::Fail(e) => return Err(e),
            }
        }

        Ok(self.read_new().await?.map(|entry| delivery_from(entry, 1)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ack_id(&delivery.id).await
    }
}

impl core::fmt::Debug for RedisStreamsSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsSource")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(id: &str, payload: &[u8]) -> StreamId {
        let mut map = HashMap::new();
        map.insert(PAYLOAD_FIELD.to_string(), redis::Value::Data(payload.to_vec()));
        StreamId {
            id: id.to_string(),
            map,
        }
    }

    #[test]
    fn stale_entries_below_the_limit_are_redelivered() {
        let disposition = stale_disposition(Ok(Some(entry("1-0", b"{}"))), 2, 5);
        assert!(matches!(disposition, StaleDisposition::Deliver(e) if e.id == "1-0"));
    }

    #[test]
    fn stale_entries_at_the_limit_are_dead_lettered() {
        let disposition = stale_disposition(Ok(Some(entry("1-0", b"{}"))), 5, 5);
        assert!(matches!(disposition, StaleDisposition::DeadLetter(_)));
    }

    #[test]
    fn unclaimable_entries_are_discarded_instead_of_failing_the_poll() {
        let disposition = stale_disposition(
            Err(BrokerError::Command("XCLAIM failed: response was nil".to_string())),
            1,
            5,
        );
        assert!(matches!(disposition, StaleDisposition::Discard(reason) if reason.contains("XCLAIM")));
    }

    #[test]
    fn connection_failures_still_surface() {
        let disposition =
            stale_disposition(Err(BrokerError::Connection("refused".to_string())), 1, 5);
        assert!(matches!(disposition, StaleDisposition::Fail(BrokerError::Connection(_))));
    }

    #[test]
    fn claimed_elsewhere_stops_reclaiming() {
        assert!(matches!(stale_disposition(Ok(None), 1, 5), StaleDisposition::TakenElsewhere));
    }

    #[test]
    fn deliveries_carry_the_payload_field() {
        let delivery = delivery_from(entry("7-1", br#"{"user_id":1}"#), 3);
        assert_eq!(delivery.id, "7-1");
        assert_eq!(delivery.payload, br#"{"user_id":1}"#.to_vec());
        assert_eq!(delivery.delivery_count, 3);

        let empty = delivery_from(StreamId::default(), 1);
        assert!(empty.payload.is_empty());
    }
}
