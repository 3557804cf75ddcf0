//! Broker transport seams.
//!
//! The pipeline talks to the broker through two narrow traits, one per side.
//! Production code binds them to a real broker client; tests bind them to
//! [`InMemoryBroker`], which keeps partition logs in process and lets tests
//! inject delivery failures and withhold reports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use oxbow_core::{
    DeliveryHandle, DeliveryReport, InboundMessage, Offset, OutboundMessage, PartitionId,
    TopicPartition,
};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::router::PartitionRouter;

/// Capacity of the delivery-report channel.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Producer-side broker capability.
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    /// Hands a message to the broker without waiting for acknowledgment.
    ///
    /// The broker reports the outcome later on the event stream, tagged with
    /// `handle`.
    ///
    /// # Errors
    /// Returns an error only if the message could not be enqueued at all;
    /// delivery failures arrive as failed reports instead.
    async fn produce(&self, handle: DeliveryHandle, message: OutboundMessage) -> ClientResult<()>;

    /// Takes the delivery-report receiver.
    ///
    /// Yields `Some` exactly once; the stream closes when the transport is
    /// closed.
    fn take_events(&self) -> Option<mpsc::Receiver<DeliveryReport>>;

    /// Releases the broker connection. Idempotent.
    async fn close(&self) -> ClientResult<()>;
}

/// Consumer-side broker capability.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    /// Joins the configured group and subscribes to the given topics.
    ///
    /// # Errors
    /// Returns an error if the subscription is rejected.
    async fn subscribe(&self, topics: &[String]) -> ClientResult<()>;

    /// Replaces group assignment with an explicit partition/offset list.
    ///
    /// Used for historical re-reads; the next poll starts each partition at
    /// its given offset.
    ///
    /// # Errors
    /// Returns an error if an assigned partition does not exist.
    async fn assign(&self, assignments: &[(TopicPartition, Offset)]) -> ClientResult<()>;

    /// Waits up to `timeout` for the next message.
    ///
    /// `Ok(None)` means the wait elapsed with nothing available, which is
    /// the normal idle case and not an error.
    ///
    /// # Errors
    /// Returns an error on broker-level failures.
    async fn poll(&self, timeout: Duration) -> ClientResult<Option<InboundMessage>>;

    /// Leaves the group and releases the connection. Idempotent.
    async fn close(&self) -> ClientResult<()>;
}

struct StoredMessage {
    key: Option<Bytes>,
    payload: Bytes,
}

struct TopicState {
    partitions: Vec<Vec<StoredMessage>>,
    round_robin: usize,
}

struct BrokerState {
    topics: HashMap<String, TopicState>,
    failing_topics: Vec<String>,
    held_reports: Vec<DeliveryReport>,
    events_tx: Option<mpsc::Sender<DeliveryReport>>,
    events_rx: Option<mpsc::Receiver<DeliveryReport>>,
}

/// In-process broker fake backing both transport traits in tests.
///
/// Messages land in per-partition logs; every produce emits a delivery
/// report on the bounded event channel. `fail_topic` turns reports for a
/// topic into failures, `hold_reports` withholds reports until released so
/// tests can observe a producer mid-flush.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    data_available: Arc<Notify>,
    hold_reports: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    partitions_per_topic: usize,
    fail_polls: Arc<AtomicU32>,
}

impl InMemoryBroker {
    /// Creates a broker that gives every topic `partitions_per_topic`
    /// partitions on first use.
    #[must_use]
    pub fn new(partitions_per_topic: usize) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                topics: HashMap::new(),
                failing_topics: Vec::new(),
                held_reports: Vec::new(),
                events_tx: Some(tx),
                events_rx: Some(rx),
            })),
            data_available: Arc::new(Notify::new()),
            hold_reports: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            partitions_per_topic: partitions_per_topic.max(1),
            fail_polls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Creates a consumer handle with its own subscription and positions.
    #[must_use]
    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            state: Arc::new(Mutex::new(ConsumerState {
                subscriptions: Vec::new(),
                positions: HashMap::new(),
                explicit_assignment: false,
            })),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes deliveries to `topic` fail with a broker-side error report.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.lock_state().failing_topics.push(topic.into());
    }

    /// Withholds delivery reports until [`release_reports`] is called.
    ///
    /// [`release_reports`]: Self::release_reports
    pub fn hold_reports(&self, hold: bool) {
        self.hold_reports.store(hold, Ordering::SeqCst);
    }

    /// Emits all withheld delivery reports and stops holding new ones.
    pub async fn release_reports(&self) {
        self.hold_reports.store(false, Ordering::SeqCst);
        let (tx, reports) = {
            let mut state = self.lock_state();
            (state.events_tx.clone(), std::mem::take(&mut state.held_reports))
        };
        if let Some(tx) = tx {
            for report in reports {
                let _ = tx.send(report).await;
            }
        }
    }

    /// Makes the next `count` polls fail with a broker error.
    pub fn fail_next_polls(&self, count: u32) {
        self.fail_polls.store(count, Ordering::SeqCst);
    }

    /// Number of messages stored in a topic partition.
    #[must_use]
    pub fn partition_len(&self, topic: &str, partition: PartitionId) -> usize {
        let state = self.lock_state();
        state
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(usize::try_from(partition.get()).unwrap_or(0)))
            .map_or(0, Vec::len)
    }

    /// Total messages stored in a topic across partitions.
    #[must_use]
    pub fn topic_len(&self, topic: &str) -> usize {
        let state = self.lock_state();
        state
            .topics
            .get(topic)
            .map_or(0, |t| t.partitions.iter().map(Vec::len).sum())
    }

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)] // Test-scale sizes.
    fn append(&self, handle: DeliveryHandle, message: OutboundMessage) -> DeliveryReport {
        let mut state = self.lock_state();
        if state.failing_topics.iter().any(|t| t == &message.topic) {
            return DeliveryReport::failed(
                handle,
                message.topic,
                message.partition,
                "broker rejected message",
            );
        }

        let partition_count = self.partitions_per_topic;
        let topic = state
            .topics
            .entry(message.topic.clone())
            .or_insert_with(|| TopicState {
                partitions: (0..partition_count).map(|_| Vec::new()).collect(),
                round_robin: 0,
            });

        let index = match message.partition {
            Some(partition) => {
                let index = usize::try_from(partition.get()).unwrap_or(usize::MAX);
                if index >= topic.partitions.len() {
                    return DeliveryReport::failed(
                        handle,
                        message.topic,
                        Some(partition),
                        "unknown partition",
                    );
                }
                index
            }
            None => match &message.key {
                // The broker's own partitioner mirrors the client-side one.
                Some(key) => match PartitionRouter::new().route(key, partition_count as i32) {
                    Ok(partition) => partition.get() as usize,
                    Err(_) => 0,
                },
                None => {
                    topic.round_robin = (topic.round_robin + 1) % topic.partitions.len();
                    topic.round_robin
                }
            },
        };

        let log = &mut topic.partitions[index];
        let offset = Offset::new(log.len() as i64);
        log.push(StoredMessage {
            key: message.key,
            payload: message.payload,
        });

        DeliveryReport::acked(handle, message.topic, PartitionId::new(index as i32), offset)
    }
}

#[async_trait]
impl ProducerTransport for InMemoryBroker {
    async fn produce(&self, handle: DeliveryHandle, message: OutboundMessage) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let report = self.append(handle, message);
        self.data_available.notify_waiters();

        if self.hold_reports.load(Ordering::SeqCst) {
            self.lock_state().held_reports.push(report);
            return Ok(());
        }

        let tx = self.lock_state().events_tx.clone();
        if let Some(tx) = tx {
            tx.send(report)
                .await
                .map_err(|_| ClientError::Closed)?;
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<DeliveryReport>> {
        self.lock_state().events_rx.take()
    }

    async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender closes the event stream once in-flight reports
        // have drained.
        self.lock_state().events_tx = None;
        debug!("in-memory broker producer closed");
        Ok(())
    }
}

struct ConsumerState {
    subscriptions: Vec<String>,
    positions: HashMap<TopicPartition, Offset>,
    explicit_assignment: bool,
}

/// Consumer handle over an [`InMemoryBroker`].
///
/// Each handle tracks its own subscription and read positions, so one broker
/// can back independent consumers in a test.
#[derive(Clone)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    state: Arc<Mutex<ConsumerState>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryConsumer {
    fn lock_state(&self) -> MutexGuard<'_, ConsumerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)] // Test-scale sizes.
    fn try_next(&self) -> Option<InboundMessage> {
        let broker = self.broker.lock_state();
        let mut state = self.lock_state();

        // Subscribed topics start every partition at the earliest offset.
        if !state.explicit_assignment {
            for topic in state.subscriptions.clone() {
                if let Some(topic_state) = broker.topics.get(&topic) {
                    for index in 0..topic_state.partitions.len() {
                        let tp = TopicPartition::new(topic.clone(), PartitionId::new(index as i32));
                        state.positions.entry(tp).or_insert(Offset::new(0));
                    }
                }
            }
        }

        let mut keys: Vec<TopicPartition> = state.positions.keys().cloned().collect();
        keys.sort_by(|a, b| (&a.topic, a.partition.get()).cmp(&(&b.topic, b.partition.get())));

        for tp in keys {
            let position = state.positions[&tp];
            let Ok(index) = usize::try_from(tp.partition.get()) else {
                continue;
            };
            let Some(log) = broker
                .topics
                .get(&tp.topic)
                .and_then(|t| t.partitions.get(index))
            else {
                continue;
            };
            let cursor = usize::try_from(position.get()).unwrap_or(usize::MAX);
            if let Some(stored) = log.get(cursor) {
                state.positions.insert(tp.clone(), position.next());
                return Some(InboundMessage::new(
                    tp.topic,
                    tp.partition,
                    position,
                    stored.key.clone(),
                    stored.payload.clone(),
                ));
            }
        }
        None
    }
}

#[async_trait]
impl ConsumerTransport for InMemoryConsumer {
    async fn subscribe(&self, topics: &[String]) -> ClientResult<()> {
        let mut state = self.lock_state();
        state.subscriptions = topics.to_vec();
        state.positions.clear();
        state.explicit_assignment = false;
        Ok(())
    }

    async fn assign(&self, assignments: &[(TopicPartition, Offset)]) -> ClientResult<()> {
        let mut state = self.lock_state();
        state.subscriptions.clear();
        state.explicit_assignment = true;
        state.positions = assignments.iter().cloned().collect();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> ClientResult<Option<InboundMessage>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if self
            .broker
            .fail_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClientError::Broker {
                message: "injected poll failure".to_string(),
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }
            let notified = self.broker.data_available.notified();
            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(&self) -> ClientResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_produce_lands_in_partition_log() {
        let broker = InMemoryBroker::new(3);
        let message =
            OutboundMessage::new("events", "payload").with_partition(PartitionId::new(1));
        broker
            .produce(DeliveryHandle::new(1), message)
            .await
            .unwrap();

        assert_eq!(broker.partition_len("events", PartitionId::new(1)), 1);
        assert_eq!(broker.topic_len("events"), 1);
    }

    #[tokio::test]
    async fn test_produce_emits_acked_report() {
        let broker = InMemoryBroker::new(1);
        let mut events = broker.take_events().unwrap();

        broker
            .produce(DeliveryHandle::new(7), OutboundMessage::new("events", "x"))
            .await
            .unwrap();

        let report = events.recv().await.unwrap();
        assert_eq!(report.handle, DeliveryHandle::new(7));
        assert!(report.is_acked());
        assert_eq!(report.offset, Some(Offset::new(0)));
    }

    #[tokio::test]
    async fn test_failing_topic_reports_error() {
        let broker = InMemoryBroker::new(1);
        let mut events = broker.take_events().unwrap();
        broker.fail_topic("events");

        broker
            .produce(DeliveryHandle::new(1), OutboundMessage::new("events", "x"))
            .await
            .unwrap();

        let report = events.recv().await.unwrap();
        assert!(!report.is_acked());
        // Never placed, so the report carries no partition.
        assert!(report.partition.is_none());
        assert_eq!(broker.topic_len("events"), 0);
    }

    #[tokio::test]
    async fn test_take_events_yields_once() {
        let broker = InMemoryBroker::new(1);
        assert!(broker.take_events().is_some());
        assert!(broker.take_events().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_and_poll() {
        let broker = InMemoryBroker::new(1);
        broker
            .produce(DeliveryHandle::new(1), OutboundMessage::new("events", "a"))
            .await
            .unwrap();

        let consumer = broker.consumer();
        consumer.subscribe(&["events".to_string()]).await.unwrap();

        let message = consumer
            .poll(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, "events");
        assert_eq!(message.payload, Bytes::from("a"));
        assert_eq!(message.offset, Offset::new(0));
    }

    #[tokio::test]
    async fn test_poll_timeout_is_not_an_error() {
        let broker = InMemoryBroker::new(1);
        let consumer = broker.consumer();
        consumer.subscribe(&["empty".to_string()]).await.unwrap();

        let result = consumer.poll(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_assign_starts_at_given_offset() {
        let broker = InMemoryBroker::new(1);
        for payload in ["a", "b", "c"] {
            broker
                .produce(
                    DeliveryHandle::new(0),
                    OutboundMessage::new("events", payload)
                        .with_partition(PartitionId::new(0)),
                )
                .await
                .unwrap();
        }

        let consumer = broker.consumer();
        consumer
            .assign(&[(
                TopicPartition::new("events", PartitionId::new(0)),
                Offset::new(1),
            )])
            .await
            .unwrap();

        let message = consumer
            .poll(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, Bytes::from("b"));
        assert_eq!(message.offset, Offset::new(1));
    }

    #[tokio::test]
    async fn test_injected_poll_failure() {
        let broker = InMemoryBroker::new(1);
        broker.fail_next_polls(1);

        let consumer = broker.consumer();
        consumer.subscribe(&["events".to_string()]).await.unwrap();

        let err = consumer.poll(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, ClientError::Broker { .. }));

        // Subsequent polls recover.
        assert!(consumer.poll(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_keyed_produce_is_sticky() {
        let broker = InMemoryBroker::new(4);
        for _ in 0..5 {
            broker
                .produce(
                    DeliveryHandle::new(0),
                    OutboundMessage::new("events", "x").with_key("user-1"),
                )
                .await
                .unwrap();
        }

        let expected = PartitionRouter::new().route(b"user-1", 4).unwrap();
        assert_eq!(broker.partition_len("events", expected), 5);
    }
}
