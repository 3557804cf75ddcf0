//! Error types for schema resolution and payload coding.

use oxbow_core::SchemaId;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised by schema resolution and the wire codec.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The registry has no schema under the requested id.
    #[error("schema not found: id {id}")]
    SchemaNotFound {
        /// The unknown schema id.
        id: SchemaId,
    },

    /// The registry could not be reached.
    #[error("schema registry unavailable: {message}")]
    RegistryUnavailable {
        /// Transport-level failure description.
        message: String,
    },

    /// A schema definition does not parse.
    #[error("invalid schema definition: {message}")]
    InvalidSchema {
        /// Parser failure description.
        message: String,
    },

    /// The raw bytes are too short to contain an envelope.
    #[error("malformed envelope: {len} bytes, need more than {min}")]
    MalformedEnvelope {
        /// Observed length.
        len: usize,
        /// Minimum length exclusive.
        min: usize,
    },

    /// The leading magic byte is not the expected zero.
    #[error("unsupported magic byte: {byte:#04x}")]
    UnsupportedMagicByte {
        /// The rejected first byte.
        byte: u8,
    },

    /// The envelope is valid but the payload does not match the schema.
    #[error("payload decode failed for schema {id}: {message}")]
    PayloadDecode {
        /// Schema the payload claimed to follow.
        id: SchemaId,
        /// Decoder failure description.
        message: String,
    },

    /// A record does not fit the schema it is being encoded with.
    #[error("payload encode failed: {message}")]
    PayloadEncode {
        /// Encoder failure description.
        message: String,
    },
}

impl SchemaError {
    /// Creates a `RegistryUnavailable` error from any error type.
    pub fn unavailable<E: std::fmt::Display>(err: E) -> Self {
        Self::RegistryUnavailable {
            message: err.to_string(),
        }
    }

    /// Short stable name of the error kind, for log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SchemaNotFound { .. } => "schema_not_found",
            Self::RegistryUnavailable { .. } => "registry_unavailable",
            Self::InvalidSchema { .. } => "invalid_schema",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::UnsupportedMagicByte { .. } => "unsupported_magic_byte",
            Self::PayloadDecode { .. } => "payload_decode",
            Self::PayloadEncode { .. } => "payload_encode",
        }
    }
}
