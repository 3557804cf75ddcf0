//! Oxbow Core - Strongly-typed identifiers, message types, and configuration.
//!
//! This crate provides the shared vocabulary for the Oxbow message-bus client:
//! identifier newtypes, inbound/outbound message shapes, delivery reports, and
//! the typed client configuration parsed from broker-style option maps.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `SchemaId` with a `PartitionId`
//! - **Explicit presence**: Optional fields are `Option`, never a sentinel
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
mod error;
mod message;
mod types;

pub use config::{Acks, AutoOffsetReset, ClientConfig, CommitPolicy};
pub use error::{ConfigError, ConfigResult};
pub use message::{DeliveryReport, InboundMessage, OutboundMessage};
pub use types::{DeliveryHandle, Offset, PartitionId, SchemaId, TopicPartition};
