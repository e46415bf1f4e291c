//! Engine configuration.
//!
//! Loaded from a TOML file; every field has a default so a minimal config
//! only names the transport bindings. Validation runs once at load and
//! rejects values the pipeline cannot operate with, notably non-power-of-two
//! shard counts and ring capacities.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shard::ShardPolicy;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {reason}")]
    Io {
        /// Path to the config file.
        path: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is outside what the engine supports.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One transport binding: a channel string plus a stream id.
///
/// The channel string is opaque to the engine; the transport decides what
/// it means (an in-process key, a `host:port` endpoint, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    /// Transport channel.
    pub channel: String,
    /// Stream id within the channel.
    pub stream_id: u32,
}

/// Where the user store lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file path; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory for rotated log files; stdout-only when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Size threshold at which the current log file rotates.
    #[serde(default = "default_log_rotate_size")]
    pub rotate_size: u64,
}

const fn default_log_rotate_size() -> u64 {
    10 * 1024 * 1024
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            rotate_size: default_log_rotate_size(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker shards; must be a power of two.
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,

    /// Per-shard ring capacity in bytes; must be a power of two.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// How long the ingestor retries a full ring before dropping.
    #[serde(default = "default_shard_timeout")]
    #[serde(with = "humantime_serde")]
    pub shard_timeout: Duration,

    /// Busy spins before the idle strategy starts yielding.
    #[serde(default = "default_idle_spins")]
    pub idle_spins: u32,

    /// Yields before the idle strategy starts sleeping.
    #[serde(default = "default_idle_yields")]
    pub idle_yields: u32,

    /// How inbound frames are mapped to shards.
    #[serde(default)]
    pub shard_policy: ShardPolicy,

    /// Inbound transport binding.
    pub subscription: ChannelBinding,

    /// Outbound transport binding.
    pub publication: ChannelBinding,

    /// User store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Log sink settings.
    #[serde(default)]
    pub log: LogConfig,
}

const fn default_num_shards() -> usize {
    4
}

const fn default_ring_capacity() -> usize {
    1024 * 1024
}

const fn default_shard_timeout() -> Duration {
    Duration::from_millis(50)
}

const fn default_idle_spins() -> u32 {
    100
}

const fn default_idle_yields() -> u32 {
    1000
}

impl EngineConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.num_shards.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "num_shards must be a power of two, got {}",
                self.num_shards
            )));
        }
        if !self.ring_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "ring_capacity must be a power of two, got {}",
                self.ring_capacity
            )));
        }
        // Rings cap record payloads at an eighth of their capacity.
        if self.ring_capacity / 8 < crate::codec::FRAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "ring_capacity of {} bytes cannot accept a {}-byte frame",
                self.ring_capacity,
                crate::codec::FRAME_LEN
            )));
        }
        if self.shard_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "shard_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [subscription]
            channel = "ekyc.requests"
            stream_id = 1001

            [publication]
            channel = "ekyc.replies"
            stream_id = 1001
        "#
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: EngineConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.num_shards, 4);
        assert_eq!(config.ring_capacity, 1024 * 1024);
        assert_eq!(config.shard_timeout, Duration::from_millis(50));
        assert_eq!(config.idle_spins, 100);
        assert_eq!(config.idle_yields, 1000);
        assert_eq!(config.shard_policy, ShardPolicy::RoundRobin);
        assert!(config.store.path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config_parses() {
        let text = r#"
            num_shards = 8
            ring_capacity = 65536
            shard_timeout = "10ms"
            idle_spins = 50
            idle_yields = 500
            shard_policy = "key-affinity"

            [subscription]
            channel = "udp://127.0.0.1:50000"
            stream_id = 1001

            [publication]
            channel = "udp://127.0.0.1:10001"
            stream_id = 1001

            [store]
            path = "users.db"

            [log]
            dir = "logs"
            rotate_size = 1048576
        "#;
        let config: EngineConfig = toml::from_str(text).unwrap();
        assert_eq!(config.num_shards, 8);
        assert_eq!(config.shard_timeout, Duration::from_millis(10));
        assert_eq!(config.shard_policy, ShardPolicy::KeyAffinity);
        assert_eq!(config.store.path.as_deref(), Some(Path::new("users.db")));
        assert_eq!(config.log.rotate_size, 1_048_576);
        config.validate().unwrap();
    }

    #[test]
    fn test_non_power_of_two_shards_rejected() {
        let mut config: EngineConfig = toml::from_str(minimal_toml()).unwrap();
        config.num_shards = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_non_power_of_two_ring_rejected() {
        let mut config: EngineConfig = toml::from_str(minimal_toml()).unwrap();
        config.ring_capacity = 1_000_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_toml().as_bytes()).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.subscription.channel, "ekyc.requests");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = EngineConfig::load(Path::new("/nonexistent/ekyc.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
