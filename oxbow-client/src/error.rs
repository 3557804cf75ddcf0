//! Error types for the client pipeline.

use oxbow_core::ConfigError;
use oxbow_schema::SchemaError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by the producer pipeline and consumer loop.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The broker connection could not be established or was lost.
    #[error("connection error: {message}")]
    Connection {
        /// Transport failure description.
        message: String,
    },

    /// The broker rejected or failed a request.
    #[error("broker error: {message}")]
    Broker {
        /// Broker failure description.
        message: String,
    },

    /// A message could not be handed to the broker for delivery.
    #[error("delivery error for topic {topic}: {message}")]
    Delivery {
        /// Destination topic.
        topic: String,
        /// Failure description.
        message: String,
    },

    /// A partition could not be assigned for a keyed message.
    #[error("partition assignment error: {message}")]
    PartitionAssignment {
        /// Why no partition could be chosen.
        message: String,
    },

    /// Schema resolution or payload coding failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The component has already been closed.
    #[error("client is closed")]
    Closed,
}

impl ClientError {
    /// Creates a `Connection` error from any error type.
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }

    /// Creates a `Broker` error from any error type.
    pub fn broker<E: std::fmt::Display>(err: E) -> Self {
        Self::Broker {
            message: err.to_string(),
        }
    }

    /// Creates a `Delivery` error.
    pub fn delivery(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            topic: topic.into(),
            message: message.into(),
        }
    }
}
