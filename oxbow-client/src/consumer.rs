//! Poll-decode-dispatch consumer loop.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use oxbow_core::{ClientConfig, CommitPolicy, Offset, PartitionId, TopicPartition};
use oxbow_schema::{wire, AvroValue, SchemaCache};
use tracing::{debug, info, trace, warn};

use crate::error::{ClientError, ClientResult};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::ConsumerTransport;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Where a dispatched message came from.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: PartitionId,
    /// Offset within the partition.
    pub offset: Offset,
    /// Message key, if any.
    pub key: Option<Bytes>,
    /// Broker timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// Single-owner consume loop over a consumer transport.
///
/// The loop runs `Idle -> Running -> Stopped` exactly once. While running it
/// polls with the configured wait bound, decodes each enveloped payload
/// through the schema cache, and hands the value to the caller's handler.
/// The handler returning `false`, a [`stop`] call, or the shutdown signal
/// all end the loop at the top of the next iteration, so stopping latency
/// is bounded by one poll interval.
///
/// Offset commits are whatever the underlying broker client was configured
/// to do; the loop only exposes the policy via [`commit_policy`].
///
/// [`stop`]: Self::stop
/// [`commit_policy`]: Self::commit_policy
pub struct ConsumerLoop {
    config: ClientConfig,
    transport: Arc<dyn ConsumerTransport>,
    cache: Arc<SchemaCache>,
    shutdown: ShutdownCoordinator,
    state: AtomicU8,
    last_poll_ms: AtomicI64,
}

impl ConsumerLoop {
    /// Creates an idle loop.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn ConsumerTransport>,
        cache: Arc<SchemaCache>,
        shutdown: ShutdownCoordinator,
    ) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            cache,
            shutdown,
            state: AtomicU8::new(STATE_IDLE),
            last_poll_ms: AtomicI64::new(0),
        })
    }

    /// Joins the consumer group and subscribes to the given topics.
    ///
    /// # Errors
    /// Returns an error if no `group.id` is configured or the transport
    /// rejects the subscription.
    pub async fn subscribe(&self, topics: &[String]) -> ClientResult<()> {
        self.config.validate_for_group_consumer()?;
        self.transport.subscribe(topics).await?;
        info!(topics = ?topics, "subscribed");
        Ok(())
    }

    /// Assigns explicit partitions and starting offsets, bypassing group
    /// management. Used for historical re-reads.
    ///
    /// # Errors
    /// Returns an error if the transport rejects the assignment.
    pub async fn assign(&self, assignments: &[(TopicPartition, Offset)]) -> ClientResult<()> {
        self.transport.assign(assignments).await?;
        for (tp, offset) in assignments {
            debug!(partition = %tp, offset = %offset, "assigned");
        }
        Ok(())
    }

    /// Runs the loop until the handler declines, `stop` is called, or
    /// shutdown is requested.
    ///
    /// The handler receives the decoded value and its source metadata and
    /// returns whether the loop should keep running.
    ///
    /// # Errors
    /// `Closed` if the loop already ran; broker errors are handled inside
    /// the loop, not returned.
    pub async fn run<F>(&self, mut handler: F) -> ClientResult<()>
    where
        F: FnMut(AvroValue, &MessageContext) -> bool + Send,
    {
        if self
            .state
            .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::Closed);
        }
        info!("consumer loop running");

        while self.state.load(Ordering::SeqCst) == STATE_RUNNING && !self.shutdown.is_requested()
        {
            let polled = self.transport.poll(self.config.fetch_wait_max).await;
            self.last_poll_ms.store(now_ms(), Ordering::SeqCst);
            match polled {
                Ok(None) => {
                    // Idle poll; the normal case on a quiet topic.
                    trace!("poll timeout");
                }
                Ok(Some(message)) => {
                    let context = MessageContext {
                        topic: message.topic,
                        partition: message.partition,
                        offset: message.offset,
                        key: message.key,
                        timestamp_ms: message.timestamp_ms,
                    };
                    match wire::decode(&message.payload, &self.cache).await {
                        Ok((schema_id, value)) => {
                            trace!(
                                topic = %context.topic,
                                partition = %context.partition,
                                offset = %context.offset,
                                schema_id = %schema_id,
                                "message dispatched"
                            );
                            if !handler(value, &context) {
                                debug!("handler requested stop");
                                self.stop();
                            }
                        }
                        Err(err) => {
                            // One bad message never stops the loop.
                            warn!(
                                topic = %context.topic,
                                partition = %context.partition,
                                offset = %context.offset,
                                error_kind = err.kind(),
                                error = %err,
                                "message skipped"
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "broker poll failed, backing off");
                    tokio::time::sleep(self.config.fetch_error_backoff).await;
                }
            }
        }

        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!("consumer loop stopped");
        Ok(())
    }

    /// Runs the loop for at most `duration`, then stops it.
    ///
    /// # Errors
    /// Same as [`run`](Self::run).
    pub async fn run_for<F>(&self, duration: Duration, handler: F) -> ClientResult<()>
    where
        F: FnMut(AvroValue, &MessageContext) -> bool + Send,
    {
        let run = self.run(handler);
        tokio::pin!(run);
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut expired = false;
        loop {
            tokio::select! {
                result = &mut run => return result,
                () = &mut deadline, if !expired => {
                    expired = true;
                    debug!("run deadline reached");
                    self.stop();
                }
            }
        }
    }

    /// Stops the loop. Idempotent; a loop that never ran will refuse to.
    pub fn stop(&self) {
        if self.state.swap(STATE_STOPPED, Ordering::SeqCst) != STATE_STOPPED {
            debug!("consumer loop stopping");
        }
    }

    /// Returns true while the loop is polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// The offset-commit policy the broker client was configured with.
    #[must_use]
    pub const fn commit_policy(&self) -> CommitPolicy {
        self.config.commit_policy()
    }

    /// When the loop last completed a poll, in milliseconds since the Unix
    /// epoch. `None` before the first poll.
    #[must_use]
    pub fn last_poll_at_ms(&self) -> Option<i64> {
        match self.last_poll_ms.load(Ordering::SeqCst) {
            0 => None,
            at => Some(at),
        }
    }

    /// Leaves the group and releases the transport.
    ///
    /// # Errors
    /// Returns transport close errors.
    pub async fn close(&self) -> ClientResult<()> {
        self.stop();
        self.transport.close().await
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
