//! Configuration error types.

use thiserror::Error;

/// Result type for configuration parsing and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while parsing or validating client configuration.
///
/// Configuration errors are fatal at construction time; nothing in the
/// client retries past an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required option is missing.
    #[error("missing required option: {name}")]
    MissingOption {
        /// Option name, e.g. `bootstrap.servers`.
        name: &'static str,
    },

    /// An option has a value that cannot be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Option name.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// An option name is not recognized.
    #[error("unknown option: {name}")]
    UnknownOption {
        /// The unrecognized option name.
        name: String,
    },
}
