//! Oxbow Client - producer pipeline and consumer loop over a broker
//! transport.
//!
//! The broker and schema registry are external collaborators reached
//! through narrow async traits ([`ProducerTransport`], [`ConsumerTransport`],
//! and `oxbow_schema::RegistryClient`). Everything else is owned here:
//! partition routing, delivery accounting, the poll-decode-dispatch consumer
//! loop, cooperative shutdown, and time-based redelivery through retry
//! topics.
//!
//! # Components
//!
//! - [`ProducerPipeline`]: encode, route, publish, and track deliveries
//! - [`ConsumerLoop`]: bounded-poll consume loop with log-and-skip decoding
//! - [`DeliveryTracker`]: Pending/Acked/Failed accounting behind `flush`
//! - [`PartitionRouter`]: CRC-32 keyed partition selection
//! - [`ShutdownCoordinator`]: clonable, idempotent shutdown signal
//! - [`retry`]: `<topic>-retry` scheduling and the forwarder loop

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod consumer;
mod delivery;
mod error;
mod producer;
pub mod retry;
mod router;
mod shutdown;
mod transport;

pub use consumer::{ConsumerLoop, MessageContext};
pub use delivery::{DeliveryRecord, DeliveryState, DeliveryTracker};
pub use error::{ClientError, ClientResult};
pub use producer::ProducerPipeline;
pub use retry::{RetryEnvelope, RetryForwarder};
pub use router::PartitionRouter;
pub use shutdown::ShutdownCoordinator;
pub use transport::{ConsumerTransport, InMemoryBroker, InMemoryConsumer, ProducerTransport};
