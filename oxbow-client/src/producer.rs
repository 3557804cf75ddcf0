//! Producer pipeline: schema encoding, routing, and delivery tracking over
//! a producer transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use oxbow_core::{ClientConfig, DeliveryHandle, DeliveryReport, OutboundMessage, SchemaId};
use oxbow_schema::{wire, AvroValue, SchemaCache};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::delivery::{DeliveryRecord, DeliveryTracker};
use crate::error::{ClientError, ClientResult};
use crate::router::PartitionRouter;
use crate::transport::ProducerTransport;

/// How long `close` waits for outstanding reports before giving up.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Publishes schema-encoded messages and accounts for their delivery.
///
/// Publishing is fire-and-forget: each call returns a [`DeliveryHandle`]
/// once the broker has accepted the message for sending, and a background
/// listener task finalizes the handle when the delivery report arrives.
/// `flush` waits for the in-flight window to drain; `close` flushes, then
/// releases the transport exactly once.
pub struct ProducerPipeline {
    transport: Arc<dyn ProducerTransport>,
    cache: Arc<SchemaCache>,
    router: PartitionRouter,
    tracker: Arc<DeliveryTracker>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ProducerPipeline {
    /// Creates a pipeline and starts its delivery-report listener.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the transport's
    /// event stream was already taken.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn ProducerTransport>,
        cache: Arc<SchemaCache>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let events = transport.take_events().ok_or(ClientError::Connection {
            message: "delivery event stream already taken".to_string(),
        })?;

        let tracker = Arc::new(DeliveryTracker::new());
        let listener = tracker.spawn_listener(events);
        debug!(acks = ?config.acks, "producer pipeline started");

        Ok(Self {
            transport,
            cache,
            router: PartitionRouter::new(),
            tracker,
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
        })
    }

    /// Publishes an already wire-encoded message.
    ///
    /// # Errors
    /// `Closed` after `close`, or `Delivery` if the transport refuses the
    /// message outright.
    pub async fn publish_raw(&self, message: OutboundMessage) -> ClientResult<DeliveryHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let handle = self.tracker.track(&message.topic);
        let topic = message.topic.clone();
        if let Err(err) = self.transport.produce(handle, message).await {
            // The transport never accepted the message, so no report will
            // arrive; settle the record here. The message was never placed,
            // so the report carries no partition.
            self.tracker.finalize(&DeliveryReport::failed(
                handle,
                topic.clone(),
                None,
                err.to_string(),
            ));
            return Err(ClientError::delivery(topic, err.to_string()));
        }
        Ok(handle)
    }

    /// Encodes a value under a schema and publishes it, letting the broker
    /// pick the partition.
    ///
    /// # Errors
    /// Schema resolution/encoding errors, plus everything `publish_raw`
    /// returns.
    pub async fn publish(
        &self,
        topic: &str,
        schema_id: SchemaId,
        key: Option<Bytes>,
        value: &AvroValue,
    ) -> ClientResult<DeliveryHandle> {
        let payload = self.encode(schema_id, value).await?;
        let mut message = OutboundMessage::new(topic, payload);
        if let Some(key) = key {
            message = message.with_key(key);
        }
        self.publish_raw(message).await
    }

    /// Encodes and publishes onto the partition the CRC router picks for
    /// the key.
    ///
    /// # Errors
    /// `PartitionAssignment` when `partition_count` is not positive, plus
    /// everything `publish` returns.
    pub async fn publish_routed(
        &self,
        topic: &str,
        schema_id: SchemaId,
        key: Bytes,
        value: &AvroValue,
        partition_count: i32,
    ) -> ClientResult<DeliveryHandle> {
        let partition = self.router.route(&key, partition_count)?;
        let payload = self.encode(schema_id, value).await?;
        let message = OutboundMessage::new(topic, payload)
            .with_key(key)
            .with_partition(partition);
        self.publish_raw(message).await
    }

    /// Publishes a batch, continuing past per-message failures.
    ///
    /// Failed messages are logged and skipped; the return value is the
    /// number successfully handed to the broker.
    pub async fn publish_batch(
        &self,
        topic: &str,
        schema_id: SchemaId,
        entries: &[(Option<Bytes>, AvroValue)],
    ) -> usize {
        let mut sent = 0;
        for (index, (key, value)) in entries.iter().enumerate() {
            match self.publish(topic, schema_id, key.clone(), value).await {
                Ok(_) => sent += 1,
                Err(err) => {
                    warn!(topic, index, error = %err, "batch message skipped");
                }
            }
        }
        debug!(topic, sent, total = entries.len(), "batch published");
        sent
    }

    /// Waits for outstanding delivery reports.
    ///
    /// Returns the number of messages still unreported when the timeout
    /// passes; zero means fully flushed.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let remaining = self.tracker.flush(timeout).await;
        if remaining > 0 {
            warn!(remaining, "flush timed out with messages outstanding");
        }
        remaining
    }

    /// Flushes, then releases the transport. Idempotent.
    ///
    /// This is the pipeline's step in the coordinated shutdown sequence:
    /// once [`ShutdownCoordinator`](crate::ShutdownCoordinator) has stopped
    /// the consumers, calling `close` drains outstanding reports and closes
    /// the event stream, which in turn ends the listener task.
    ///
    /// # Errors
    /// Returns transport close errors; the pipeline is unusable afterwards
    /// either way.
    pub async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let remaining = self.tracker.flush(CLOSE_FLUSH_TIMEOUT).await;
        if remaining > 0 {
            warn!(remaining, "closing producer with undelivered messages");
        }
        self.transport.close().await?;

        // Transport close drops the event sender, so the listener drains the
        // tail of the stream and exits.
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        info!("producer pipeline closed");
        Ok(())
    }

    /// Number of messages awaiting delivery reports.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Snapshot of one tracked delivery.
    #[must_use]
    pub fn delivery(&self, handle: DeliveryHandle) -> Option<DeliveryRecord> {
        self.tracker.record(handle)
    }

    async fn encode(&self, schema_id: SchemaId, value: &AvroValue) -> ClientResult<Bytes> {
        let codec = self.cache.get_or_fetch(schema_id).await?;
        Ok(wire::encode(schema_id, &codec, value)?)
    }
}

#[cfg(test)]
mod tests {
    use oxbow_schema::{InMemoryRegistry, RegistryClient};

    use super::*;
    use crate::delivery::DeliveryState;
    use crate::transport::InMemoryBroker;

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "Event",
        "fields": [{"name": "id", "type": "int"}]
    }"#;

    fn event(id: i32) -> AvroValue {
        AvroValue::Record(vec![("id".to_string(), AvroValue::Int(id))])
    }

    async fn pipeline(broker: &InMemoryBroker) -> (ProducerPipeline, SchemaId) {
        let registry = Arc::new(InMemoryRegistry::new());
        let id = registry
            .register_schema("events-value", SCHEMA)
            .await
            .unwrap();
        let cache = Arc::new(SchemaCache::new(registry as Arc<dyn RegistryClient>));
        let config = ClientConfig::new(vec!["broker:9092".to_string()]);
        let pipeline =
            ProducerPipeline::new(&config, Arc::new(broker.clone()), cache).unwrap();
        (pipeline, id)
    }

    #[tokio::test]
    async fn test_publish_is_acked() {
        let broker = InMemoryBroker::new(1);
        let (pipeline, schema_id) = pipeline(&broker).await;

        let handle = pipeline
            .publish("events", schema_id, None, &event(1))
            .await
            .unwrap();
        assert_eq!(pipeline.flush(Duration::from_secs(1)).await, 0);

        assert!(matches!(
            pipeline.delivery(handle).unwrap().state,
            DeliveryState::Acked { .. }
        ));
        assert_eq!(broker.topic_len("events"), 1);
    }

    #[tokio::test]
    async fn test_publish_batch_continues_past_failures() {
        let broker = InMemoryBroker::new(1);
        let (pipeline, schema_id) = pipeline(&broker).await;

        // The middle value does not fit the schema, so its encode fails.
        let entries = vec![
            (None, event(1)),
            (None, AvroValue::String("not a record".to_string())),
            (None, event(3)),
        ];
        let sent = pipeline.publish_batch("events", schema_id, &entries).await;

        assert_eq!(sent, 2);
        assert_eq!(pipeline.flush(Duration::from_secs(1)).await, 0);
        assert_eq!(broker.topic_len("events"), 2);
    }

    #[tokio::test]
    async fn test_flush_reports_outstanding_when_reports_withheld() {
        let broker = InMemoryBroker::new(1);
        let (pipeline, schema_id) = pipeline(&broker).await;

        broker.hold_reports(true);
        pipeline
            .publish("events", schema_id, None, &event(1))
            .await
            .unwrap();

        assert_eq!(pipeline.flush(Duration::from_millis(30)).await, 1);

        broker.release_reports().await;
        assert_eq!(pipeline.flush(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let broker = InMemoryBroker::new(1);
        let (pipeline, schema_id) = pipeline(&broker).await;

        pipeline.close().await.unwrap();
        pipeline.close().await.unwrap();

        let err = pipeline
            .publish("events", schema_id, None, &event(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn test_transport_rejection_settles_record() {
        let broker = InMemoryBroker::new(1);
        let (pipeline, schema_id) = pipeline(&broker).await;

        // Close the transport out from under the pipeline so produce fails.
        use crate::transport::ProducerTransport;
        broker.close().await.unwrap();

        let err = pipeline
            .publish("events", schema_id, None, &event(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Delivery { .. }));

        // The record settled as Failed, so nothing is left pending.
        assert_eq!(pipeline.pending_count(), 0);
        assert_eq!(pipeline.flush(Duration::from_millis(10)).await, 0);
    }

    #[tokio::test]
    async fn test_routed_publish_pins_partition() {
        let broker = InMemoryBroker::new(4);
        let (pipeline, schema_id) = pipeline(&broker).await;

        let key = Bytes::from("user-7");
        pipeline
            .publish_routed("events", schema_id, key.clone(), &event(1), 4)
            .await
            .unwrap();
        pipeline.flush(Duration::from_secs(1)).await;

        let expected = PartitionRouter::new().route(&key, 4).unwrap();
        assert_eq!(broker.partition_len("events", expected), 1);
    }
}
