//! Time-based redelivery through a companion retry topic.
//!
//! Failed work is parked on `<topic>-retry` inside a JSON envelope carrying
//! its earliest processing time. A forwarder loop consumes the retry topic,
//! republishing due messages onto the main topic and re-enqueueing the rest
//! untouched. `retry_count` only moves when a new attempt is scheduled, not
//! when an envelope cycles through the queue still waiting.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use oxbow_core::{DeliveryHandle, OutboundMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::producer::ProducerPipeline;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::ConsumerTransport;

/// Suffix appended to a main topic to name its retry companion.
const RETRY_TOPIC_SUFFIX: &str = "-retry";

/// Returns the retry topic paired with a main topic.
#[must_use]
pub fn retry_topic(main_topic: &str) -> String {
    format!("{main_topic}{RETRY_TOPIC_SUFFIX}")
}

/// A message parked for later redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEnvelope {
    /// Caller-assigned message identity, stable across attempts.
    pub id: String,
    /// The original message body.
    pub payload: serde_json::Value,
    /// When the first attempt was scheduled, ms since the Unix epoch.
    pub created_at: i64,
    /// Earliest time this message may be redelivered, ms since the Unix
    /// epoch.
    pub process_at: i64,
    /// Number of redelivery attempts scheduled so far.
    pub retry_count: u32,
}

impl RetryEnvelope {
    /// Wraps a payload for redelivery after `delay`.
    #[must_use]
    pub fn new(id: impl Into<String>, payload: serde_json::Value, delay: Duration) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            payload,
            created_at: now,
            process_at: now + duration_ms(delay),
            retry_count: 0,
        }
    }

    /// Returns true once the redelivery time has passed.
    #[must_use]
    pub const fn is_due(&self, now_ms: i64) -> bool {
        self.process_at <= now_ms
    }

    /// Schedules another attempt after `delay`, bumping the attempt count.
    #[must_use]
    pub fn next_attempt(&self, delay: Duration) -> Self {
        Self {
            id: self.id.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
            process_at: now_ms() + duration_ms(delay),
            retry_count: self.retry_count + 1,
        }
    }
}

/// Parks an envelope on the retry topic paired with `main_topic`.
///
/// # Errors
/// Serialization failures surface as `Delivery`; transport errors as from
/// [`ProducerPipeline::publish_raw`].
pub async fn schedule_retry(
    pipeline: &ProducerPipeline,
    main_topic: &str,
    envelope: &RetryEnvelope,
) -> ClientResult<DeliveryHandle> {
    let topic = retry_topic(main_topic);
    let body = serde_json::to_vec(envelope)
        .map_err(|e| ClientError::delivery(topic.clone(), e.to_string()))?;
    debug!(
        id = %envelope.id,
        retry_count = envelope.retry_count,
        process_at = envelope.process_at,
        "retry scheduled"
    );
    pipeline
        .publish_raw(OutboundMessage::new(topic, body).with_key(envelope.id.clone()))
        .await
}

/// Moves due messages from a retry topic back onto its main topic.
pub struct RetryForwarder {
    main_topic: String,
    transport: Arc<dyn ConsumerTransport>,
    pipeline: Arc<ProducerPipeline>,
    poll_interval: Duration,
    shutdown: ShutdownCoordinator,
}

impl RetryForwarder {
    /// Creates a forwarder for one main topic.
    #[must_use]
    pub fn new(
        main_topic: impl Into<String>,
        transport: Arc<dyn ConsumerTransport>,
        pipeline: Arc<ProducerPipeline>,
        poll_interval: Duration,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            main_topic: main_topic.into(),
            transport,
            pipeline,
            poll_interval,
            shutdown,
        }
    }

    /// Consumes the retry topic until shutdown is requested.
    ///
    /// Due envelopes are forwarded as bare payloads to the main topic;
    /// not-yet-due ones go back on the retry topic unchanged. Envelopes
    /// that fail to parse are logged and dropped.
    ///
    /// # Errors
    /// Returns an error if the retry-topic subscription fails; poll and
    /// publish failures inside the loop are logged and retried.
    pub async fn run(&self) -> ClientResult<()> {
        let topic = retry_topic(&self.main_topic);
        self.transport.subscribe(&[topic.clone()]).await?;
        info!(topic, "retry forwarder running");

        while !self.shutdown.is_requested() {
            match self.transport.poll(self.poll_interval).await {
                Ok(None) => {}
                Ok(Some(message)) => {
                    match serde_json::from_slice::<RetryEnvelope>(&message.payload) {
                        Ok(envelope) => self.dispatch(envelope).await,
                        Err(err) => {
                            warn!(
                                topic = %message.topic,
                                partition = %message.partition,
                                offset = %message.offset,
                                error = %err,
                                "unparseable retry envelope dropped"
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "retry topic poll failed, backing off");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(topic = %retry_topic(&self.main_topic), "retry forwarder stopped");
        Ok(())
    }

    async fn dispatch(&self, envelope: RetryEnvelope) {
        if envelope.is_due(now_ms()) {
            let body = match serde_json::to_vec(&envelope.payload) {
                Ok(body) => body,
                Err(err) => {
                    warn!(id = %envelope.id, error = %err, "retry payload dropped");
                    return;
                }
            };
            let message =
                OutboundMessage::new(self.main_topic.clone(), body).with_key(envelope.id.clone());
            match self.pipeline.publish_raw(message).await {
                Ok(_) => {
                    info!(
                        id = %envelope.id,
                        retry_count = envelope.retry_count,
                        "retry forwarded to main topic"
                    );
                }
                Err(err) => {
                    warn!(id = %envelope.id, error = %err, "retry forward failed");
                }
            }
            return;
        }

        // Not due yet: put it back and let the queue cycle, state untouched.
        let topic = retry_topic(&self.main_topic);
        match serde_json::to_vec(&envelope) {
            Ok(body) => {
                let message = OutboundMessage::new(topic, body).with_key(envelope.id.clone());
                if let Err(err) = self.pipeline.publish_raw(message).await {
                    warn!(id = %envelope.id, error = %err, "retry re-enqueue failed");
                }
                // Avoid spinning on a queue that holds nothing but future
                // work.
                tokio::time::sleep(self.poll_interval).await;
            }
            Err(err) => {
                warn!(id = %envelope.id, error = %err, "retry re-enqueue failed");
            }
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)] // Millis fit i64 for centuries.
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis() as i64
}
