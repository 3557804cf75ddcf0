//! In-flight delivery accounting.
//!
//! Every submitted message gets a handle and a Pending record; the broker's
//! delivery reports finalize records exactly once. Flushing waits for the
//! pending count to drain rather than for specific handles, mirroring how
//! broker clients expose flush.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use oxbow_core::{DeliveryHandle, DeliveryReport, Offset, PartitionId};
use tokio::sync::{mpsc, Notify};
use tracing::{trace, warn};

/// Lifecycle of one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Submitted, no report yet.
    Pending,
    /// Broker accepted the message.
    Acked {
        /// Partition the broker placed the message in.
        partition: PartitionId,
        /// Assigned offset.
        offset: Offset,
    },
    /// Broker reported a failure.
    Failed {
        /// Broker-reported error.
        error: String,
    },
}

impl DeliveryState {
    /// Returns true while no report has arrived.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// One tracked message.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    /// Destination topic.
    pub topic: String,
    /// Current lifecycle state.
    pub state: DeliveryState,
}

/// Tracks every in-flight message from submission to its delivery report.
///
/// Records move Pending -> Acked/Failed exactly once. A second report for
/// the same handle is logged and ignored; the first terminal state wins.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    records: Mutex<HashMap<DeliveryHandle, DeliveryRecord>>,
    pending: AtomicUsize,
    drained: Notify,
    next_handle: AtomicU64,
}

impl DeliveryTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new in-flight message and returns its handle.
    pub fn track(&self, topic: impl Into<String>) -> DeliveryHandle {
        let handle = DeliveryHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.lock_records().insert(
            handle,
            DeliveryRecord {
                topic: topic.into(),
                state: DeliveryState::Pending,
            },
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        handle
    }

    /// Applies one delivery report.
    ///
    /// Unknown handles and repeat reports are logged at `warn` and dropped.
    pub fn finalize(&self, report: &DeliveryReport) {
        let mut records = self.lock_records();
        let Some(record) = records.get_mut(&report.handle) else {
            warn!(handle = %report.handle, topic = %report.topic, "report for unknown handle");
            return;
        };
        if !record.state.is_pending() {
            warn!(
                handle = %report.handle,
                topic = %report.topic,
                "duplicate delivery report ignored"
            );
            return;
        }

        record.state = match (&report.error, report.partition.zip(report.offset)) {
            (Some(error), _) => DeliveryState::Failed {
                error: error.clone(),
            },
            (None, Some((partition, offset))) => DeliveryState::Acked { partition, offset },
            // An ack without a placement should not happen; treat it as a
            // broker-side failure rather than inventing one.
            (None, None) => DeliveryState::Failed {
                error: "report carried neither placement nor error".to_string(),
            },
        };
        trace!(handle = %report.handle, topic = %report.topic, "delivery finalized");
        drop(records);

        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.drained.notify_waiters();
    }

    /// Number of messages still awaiting a report.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of one record.
    #[must_use]
    pub fn record(&self, handle: DeliveryHandle) -> Option<DeliveryRecord> {
        self.lock_records().get(&handle).cloned()
    }

    /// Waits until every tracked message has a report or the timeout passes.
    ///
    /// Returns the number of messages still pending; zero means fully
    /// flushed.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending_count() == 0 {
                return 0;
            }
            // Register before re-checking so a report landing between the
            // check and the await cannot be missed.
            let notified = self.drained.notified();
            if self.pending_count() == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending_count();
            }
        }
    }

    /// Spawns the listener task that drains the transport's event stream.
    ///
    /// The task exits when the stream closes, which happens when the
    /// transport is closed.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<DeliveryReport>,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(report) = events.recv().await {
                tracker.finalize(&report);
            }
            trace!("delivery event stream closed");
        })
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<DeliveryHandle, DeliveryRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_track_and_ack() {
        let tracker = DeliveryTracker::new();
        let handle = tracker.track("events");
        assert_eq!(tracker.pending_count(), 1);

        tracker.finalize(&DeliveryReport::acked(
            handle,
            "events",
            PartitionId::new(2),
            Offset::new(9),
        ));

        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(
            tracker.record(handle).unwrap().state,
            DeliveryState::Acked {
                partition: PartitionId::new(2),
                offset: Offset::new(9),
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_report_keeps_first_state() {
        let tracker = DeliveryTracker::new();
        let handle = tracker.track("events");

        tracker.finalize(&DeliveryReport::acked(
            handle,
            "events",
            PartitionId::new(0),
            Offset::new(1),
        ));
        tracker.finalize(&DeliveryReport::failed(
            handle,
            "events",
            Some(PartitionId::new(0)),
            "late failure",
        ));

        assert_eq!(tracker.pending_count(), 0);
        assert!(matches!(
            tracker.record(handle).unwrap().state,
            DeliveryState::Acked { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_handle_is_ignored() {
        let tracker = DeliveryTracker::new();
        tracker.finalize(&DeliveryReport::acked(
            DeliveryHandle::new(99),
            "events",
            PartitionId::new(0),
            Offset::new(0),
        ));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_returns_remaining_on_timeout() {
        let tracker = DeliveryTracker::new();
        tracker.track("events");
        tracker.track("events");

        let remaining = tracker.flush(Duration::from_millis(20)).await;
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn test_flush_completes_when_reports_arrive() {
        let tracker = Arc::new(DeliveryTracker::new());
        let handle = tracker.track("events");

        let flusher = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.flush(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.finalize(&DeliveryReport::acked(
            handle,
            "events",
            PartitionId::new(0),
            Offset::new(0),
        ));

        assert_eq!(flusher.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listener_drains_stream() {
        let tracker = Arc::new(DeliveryTracker::new());
        let handle = tracker.track("events");

        let (tx, rx) = mpsc::channel(8);
        let listener = tracker.spawn_listener(rx);

        tx.send(DeliveryReport::acked(
            handle,
            "events",
            PartitionId::new(0),
            Offset::new(3),
        ))
        .await
        .unwrap();
        drop(tx);
        listener.await.unwrap();

        assert_eq!(tracker.pending_count(), 0);
    }
}
