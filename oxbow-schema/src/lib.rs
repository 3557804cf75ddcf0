//! Oxbow Schema - registry-backed codecs and the self-describing wire envelope.
//!
//! Messages on the bus carry a 5-byte envelope in front of the schema-encoded
//! payload: a zero magic byte followed by the schema id as a big-endian u32.
//! This crate owns that envelope, the compiled Avro codecs behind it, and the
//! process-wide schema cache that fronts the external registry.
//!
//! # Components
//!
//! - [`RegistryClient`]: trait for the external schema-registry service
//! - [`CompiledCodec`]: a parsed Avro schema that encodes/decodes payloads
//! - [`SchemaCache`]: grow-only id-to-codec cache with per-id single-flight
//! - [`wire`]: envelope encode/decode free functions

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod cache;
mod codec;
mod error;
mod registry;
pub mod wire;

pub use cache::SchemaCache;
pub use codec::CompiledCodec;
pub use error::{SchemaError, SchemaResult};
pub use registry::{InMemoryRegistry, RegisteredSchema, RegistryClient};

pub use apache_avro::types::Value as AvroValue;
