//! Message shapes exchanged with the broker transport.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::types::{DeliveryHandle, Offset, PartitionId};

/// A message handed to the producer-side broker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Explicit partition, or `None` to let the broker's partitioner decide.
    pub partition: Option<PartitionId>,
    /// Optional message key.
    pub key: Option<Bytes>,
    /// Wire-encoded payload.
    pub payload: Bytes,
}

impl OutboundMessage {
    /// Creates a message with a broker-chosen partition.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            payload: payload.into(),
        }
    }

    /// Sets the message key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Pins the message to an explicit partition.
    #[must_use]
    pub const fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }
}

/// A message received from the consumer-side broker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition the message was read from.
    pub partition: PartitionId,
    /// Offset within the partition.
    pub offset: Offset,
    /// Optional message key.
    pub key: Option<Bytes>,
    /// Raw payload as stored by the broker.
    pub payload: Bytes,
    /// Broker timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl InboundMessage {
    /// Creates an inbound message stamped with the current time.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: PartitionId,
        offset: Offset,
        key: Option<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            payload: payload.into(),
            timestamp_ms: now_ms(),
        }
    }
}

/// Asynchronous acknowledgment for one produced message.
///
/// Reports arrive on the producer transport's event stream in broker order,
/// which need not match submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handle of the submitted message this report finalizes.
    pub handle: DeliveryHandle,
    /// Topic the message was produced to.
    pub topic: String,
    /// Final partition the broker placed the message in. `None` when the
    /// message was never placed anywhere.
    pub partition: Option<PartitionId>,
    /// Assigned offset on success.
    pub offset: Option<Offset>,
    /// Broker-reported error on failure.
    pub error: Option<String>,
}

impl DeliveryReport {
    /// Creates a successful delivery report.
    #[must_use]
    pub fn acked(
        handle: DeliveryHandle,
        topic: impl Into<String>,
        partition: PartitionId,
        offset: Offset,
    ) -> Self {
        Self {
            handle,
            topic: topic.into(),
            partition: Some(partition),
            offset: Some(offset),
            error: None,
        }
    }

    /// Creates a failed delivery report.
    ///
    /// `partition` is `Some` only if the broker had already placed the
    /// message before the failure.
    #[must_use]
    pub fn failed(
        handle: DeliveryHandle,
        topic: impl Into<String>,
        partition: Option<PartitionId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            topic: topic.into(),
            partition,
            offset: None,
            error: Some(error.into()),
        }
    }

    /// Returns true if the broker accepted the message.
    #[must_use]
    pub const fn is_acked(&self) -> bool {
        self.error.is_none()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_builders() {
        let msg = OutboundMessage::new("events", "payload")
            .with_key("user-1")
            .with_partition(PartitionId::new(3));
        assert_eq!(msg.key, Some(Bytes::from("user-1")));
        assert_eq!(msg.partition, Some(PartitionId::new(3)));
    }

    #[test]
    fn test_delivery_report_acked() {
        let report = DeliveryReport::acked(
            DeliveryHandle::new(1),
            "events",
            PartitionId::new(0),
            Offset::new(12),
        );
        assert!(report.is_acked());
        assert_eq!(report.partition, Some(PartitionId::new(0)));
        assert_eq!(report.offset, Some(Offset::new(12)));
    }

    #[test]
    fn test_delivery_report_failed_without_placement() {
        let report =
            DeliveryReport::failed(DeliveryHandle::new(2), "events", None, "broker rejected");
        assert!(!report.is_acked());
        assert!(report.partition.is_none());
        assert!(report.offset.is_none());
    }
}
