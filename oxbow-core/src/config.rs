//! Typed client configuration.
//!
//! The broker ecosystem configures clients through string option maps
//! (`bootstrap.servers`, `group.id`, ...). This module parses the recognized
//! subset into a typed configuration up front so every invalid value is a
//! construction-time failure instead of a runtime surprise.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Starting position when a consumer group has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    /// Start from the beginning of each partition.
    #[default]
    Earliest,
    /// Start from the end of each partition (only new messages).
    Latest,
}

impl AutoOffsetReset {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "earliest" => Some(Self::Earliest),
            "latest" => Some(Self::Latest),
            _ => None,
        }
    }
}

/// Producer durability requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acks {
    /// No acknowledgment (fire and forget).
    None,
    /// Wait for the partition leader.
    #[default]
    Leader,
    /// Wait for all in-sync replicas.
    All,
}

impl Acks {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "0" | "none" => Some(Self::None),
            "1" | "leader" => Some(Self::Leader),
            "-1" | "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Offset commit policy configured on the broker client.
///
/// The consumer loop does not commit offsets itself; it only reports which
/// policy the underlying broker client was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// The broker client commits offsets automatically on a cadence.
    Auto {
        /// Commit interval.
        interval: Duration,
    },
    /// The caller commits offsets explicitly.
    Manual,
}

/// Typed client configuration shared by producers and consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Broker address list (`bootstrap.servers`).
    pub bootstrap_servers: Vec<String>,
    /// Consumer-group identity (`group.id`). Required for subscription.
    pub group_id: Option<String>,
    /// Starting offset policy (`auto.offset.reset`).
    pub auto_offset_reset: AutoOffsetReset,
    /// Whether offsets commit automatically (`enable.auto.commit`).
    pub enable_auto_commit: bool,
    /// Auto-commit cadence (`auto.commit.interval.ms`).
    pub auto_commit_interval: Duration,
    /// Upper bound for one consumer poll (`fetch.wait.max.ms`).
    pub fetch_wait_max: Duration,
    /// Pause after a broker poll error (`fetch.error.backoff.ms`).
    pub fetch_error_backoff: Duration,
    /// Producer durability requirement (`acks`).
    pub acks: Acks,
}

impl ClientConfig {
    /// Creates a configuration with defaults for everything but the brokers.
    #[must_use]
    pub fn new(bootstrap_servers: Vec<String>) -> Self {
        Self {
            bootstrap_servers,
            group_id: None,
            auto_offset_reset: AutoOffsetReset::default(),
            enable_auto_commit: true,
            auto_commit_interval: Duration::from_millis(5000),
            fetch_wait_max: Duration::from_millis(100),
            fetch_error_backoff: Duration::from_millis(500),
            acks: Acks::default(),
        }
    }

    /// Sets the consumer-group identity.
    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the auto-offset-reset policy.
    #[must_use]
    pub const fn with_auto_offset_reset(mut self, reset: AutoOffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    /// Sets the poll bound.
    #[must_use]
    pub const fn with_fetch_wait_max(mut self, bound: Duration) -> Self {
        self.fetch_wait_max = bound;
        self
    }

    /// Sets the producer durability requirement.
    #[must_use]
    pub const fn with_acks(mut self, acks: Acks) -> Self {
        self.acks = acks;
        self
    }

    /// Parses a broker-style string option map.
    ///
    /// Unknown option names are rejected rather than silently ignored: a
    /// typo in `auto.offset.reset` should fail loudly, not fall back to a
    /// default.
    ///
    /// # Errors
    /// Returns an error if `bootstrap.servers` is missing, a value does not
    /// parse, or an option name is not recognized.
    pub fn from_options(options: &HashMap<String, String>) -> ConfigResult<Self> {
        let servers = options
            .get("bootstrap.servers")
            .ok_or(ConfigError::MissingOption {
                name: "bootstrap.servers",
            })?;

        let mut config = Self::new(
            servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        );

        if config.bootstrap_servers.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "bootstrap.servers".to_string(),
                value: servers.clone(),
            });
        }

        for (name, value) in options {
            match name.as_str() {
                "bootstrap.servers" => {}
                "group.id" => config.group_id = Some(value.clone()),
                "auto.offset.reset" => {
                    config.auto_offset_reset = AutoOffsetReset::parse(value)
                        .ok_or_else(|| invalid(name, value))?;
                }
                "enable.auto.commit" => {
                    config.enable_auto_commit =
                        value.parse().map_err(|_| invalid(name, value))?;
                }
                "auto.commit.interval.ms" => {
                    config.auto_commit_interval = parse_ms(name, value)?;
                }
                "fetch.wait.max.ms" => {
                    config.fetch_wait_max = parse_ms(name, value)?;
                }
                "fetch.error.backoff.ms" => {
                    config.fetch_error_backoff = parse_ms(name, value)?;
                }
                "acks" => {
                    config.acks = Acks::parse(value).ok_or_else(|| invalid(name, value))?;
                }
                _ => {
                    return Err(ConfigError::UnknownOption { name: name.clone() });
                }
            }
        }

        Ok(config)
    }

    /// Returns the configured offset commit policy.
    #[must_use]
    pub const fn commit_policy(&self) -> CommitPolicy {
        if self.enable_auto_commit {
            CommitPolicy::Auto {
                interval: self.auto_commit_interval,
            }
        } else {
            CommitPolicy::Manual
        }
    }

    /// Validates invariants common to producers and consumers.
    ///
    /// # Errors
    /// Returns an error if the broker list is empty.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingOption {
                name: "bootstrap.servers",
            });
        }
        Ok(())
    }

    /// Validates the configuration for group subscription.
    ///
    /// # Errors
    /// Returns an error if the broker list is empty or `group.id` is unset.
    pub fn validate_for_group_consumer(&self) -> ConfigResult<()> {
        self.validate()?;
        if self.group_id.is_none() {
            return Err(ConfigError::MissingOption { name: "group.id" });
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_ms(name: &str, value: &str) -> ConfigResult<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(name, value))
}
