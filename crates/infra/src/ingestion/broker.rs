//! Broker boundary for job submissions, plus an in-memory broker.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Default delivery limit before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),
}

/// One received submission message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned id, used to acknowledge.
    pub id: String,
    pub payload: Vec<u8>,
    /// How many times this message has been handed out, this time included.
    pub delivery_count: u32,
}

/// At-least-once source of submission messages.
///
/// Messages that are not acknowledged are redelivered according to the
/// broker's own policy.
#[async_trait]
pub trait SubmissionSource: Send + Sync + 'static {
    /// Receive at most one message. `None` means nothing is available right now.
    async fn poll(&self) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;
}

#[async_trait]
impl<T> SubmissionSource for Arc<T>
where
    T: SubmissionSource + ?Sized,
{
    async fn poll(&self) -> Result<Option<Delivery>, BrokerError> {
        (**self).poll().await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        (**self).ack(delivery).await
    }
}

#[derive(Debug)]
struct Entry {
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_seq: u64,
    ready: VecDeque<(u64, Entry)>,
    /// Delivered but not yet acknowledged, keyed by publish order.
    in_flight: BTreeMap<u64, Entry>,
    dead_letters: Vec<Vec<u8>>,
}

/// In-memory broker for tests/dev.
///
/// Unacknowledged deliveries become eligible again on the next poll (oldest
/// first, ahead of new messages). A message already delivered
/// `max_deliveries` times is moved to the dead-letter list instead.
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    max_deliveries: u32,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            max_deliveries: max_deliveries.max(1),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<String, BrokerError> {
        let mut state = self.lock()?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.ready.push_back((
            seq,
            Entry {
                payload: payload.into(),
                deliveries: 0,
            },
        ));
        Ok(seq.to_string())
    }

    pub fn dead_letters(&self) -> Result<Vec<Vec<u8>>, BrokerError> {
        Ok(self.lock()?.dead_letters.clone())
    }

    /// Messages waiting for their first delivery or for redelivery.
    pub fn outstanding(&self) -> Result<usize, BrokerError> {
        let state = self.lock()?;
        Ok(state.ready.len() + state.in_flight.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BrokerState>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Connection("broker state lock poisoned".to_string()))
    }
}

#[async_trait]
impl SubmissionSource for InMemoryBroker {
    async fn poll(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.lock()?;

        loop {
            let next = match state.in_flight.pop_first() {
                Some(redelivery) => Some(redelivery),
                None => state.ready.pop_front(),
            };
            let Some((seq, mut entry)) = next else {
                return Ok(None);
            };

            if entry.deliveries >= self.max_deliveries {
                warn!(
                    message_id = seq,
                    deliveries = entry.deliveries,
                    "message exceeded delivery limit, dead-lettered"
                );
                state.dead_letters.push(entry.payload);
                continue;
            }

            entry.deliveries += 1;
            let delivery = Delivery {
                id: seq.to_string(),
                payload: entry.payload.clone(),
                delivery_count: entry.deliveries,
            };
            state.in_flight.insert(seq, entry);
            return Ok(Some(delivery));
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let seq: u64 = delivery
            .id
            .parse()
            .map_err(|_| BrokerError::Command(format!("unknown message id '{}'", delivery.id)))?;
        self.lock()?.in_flight.remove(&seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let broker = InMemoryBroker::new();
        broker.publish("a").unwrap();
        broker.publish("b").unwrap();

        let first = broker.poll().await.unwrap().unwrap();
        broker.ack(&first).await.unwrap();
        let second = broker.poll().await.unwrap().unwrap();
        broker.ack(&second).await.unwrap();

        assert_eq!(first.payload, b"a".to_vec());
        assert_eq!(second.payload, b"b".to_vec());
        assert!(broker.poll().await.unwrap().is_none());
        assert_eq!(broker.outstanding().unwrap(), 0);
    }

    #[tokio::test]
    async fn unacknowledged_messages_are_redelivered_first() {
        let broker = InMemoryBroker::new();
        broker.publish("a").unwrap();
        broker.publish("b").unwrap();

        let first = broker.poll().await.unwrap().unwrap();
        let again = broker.poll().await.unwrap().unwrap();

        assert_eq!(again.id, first.id);
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn dead_letters_after_max_deliveries() {
        let broker = InMemoryBroker::with_max_deliveries(2);
        broker.publish("poison").unwrap();

        assert_eq!(broker.poll().await.unwrap().unwrap().delivery_count, 1);
        assert_eq!(broker.poll().await.unwrap().unwrap().delivery_count, 2);
        assert!(broker.poll().await.unwrap().is_none());

        assert_eq!(broker.dead_letters().unwrap(), vec![b"poison".to_vec()]);
        assert_eq!(broker.outstanding().unwrap(), 0);
    }

    #[tokio::test]
    async fn ack_of_unknown_id_is_a_command_error() {
        let broker = InMemoryBroker::new();
        let bogus = Delivery {
            id: "not-a-number".to_string(),
            payload: Vec::new(),
            delivery_count: 1,
        };
        assert!(matches!(broker.ack(&bogus).await, Err(BrokerError::Command(_))));
    }
}
