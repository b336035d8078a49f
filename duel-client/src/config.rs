//! Configuration loading for a match client.
//!
//! Configuration is loaded from a TOML file. Every field has a default, so an
//! empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use duelsync_core::{ReconnectPolicy, RulesConfig, SyncConfig};

/// Root configuration for a match client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchConfig {
    /// Seconds between follower hash checks (default: 10).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Seconds between heartbeats (default: 30).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds to wait for an acknowledgment (default: 5).
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Seconds between reconnect attempts (default: 5).
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Reconnect attempts before giving up (default: 10).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Two actions closer than this may conflict (default: 500).
    #[serde(default = "default_conflict_window_ms")]
    pub conflict_window_ms: u64,
    /// Seconds before an unresolved conflict falls back to a full sync (default: 5).
    #[serde(default = "default_conflict_resolution_timeout_secs")]
    pub conflict_resolution_timeout_secs: u64,
    /// Actions kept in local history (default: 100).
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Envelopes held while offline or awaiting ack (default: 256).
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Length of a turn in seconds (default: 90).
    #[serde(default = "default_turn_duration_secs")]
    pub turn_duration_secs: u64,
    /// Granularity of the turn clock in milliseconds (default: 1000).
    #[serde(default = "default_clock_tick_ms")]
    pub clock_tick_ms: u64,
    /// Match rules.
    #[serde(default)]
    pub rules: RulesConfig,
}

fn default_sync_interval_secs() -> u64 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_ack_timeout_secs() -> u64 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_conflict_window_ms() -> u64 {
    500
}

fn default_conflict_resolution_timeout_secs() -> u64 {
    5
}

fn default_history_capacity() -> usize {
    100
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_turn_duration_secs() -> u64 {
    90
}

fn default_clock_tick_ms() -> u64 {
    1000
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            conflict_window_ms: default_conflict_window_ms(),
            conflict_resolution_timeout_secs: default_conflict_resolution_timeout_secs(),
            history_capacity: default_history_capacity(),
            outbound_capacity: default_outbound_capacity(),
            turn_duration_secs: default_turn_duration_secs(),
            clock_tick_ms: default_clock_tick_ms(),
            rules: RulesConfig::default(),
        }
    }
}

impl MatchConfig {
    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds
    /// unusable values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("sync_interval_secs", self.sync_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("ack_timeout_secs", self.ack_timeout_secs),
            ("turn_duration_secs", self.turn_duration_secs),
            ("clock_tick_ms", self.clock_tick_ms),
            ("max_reconnect_attempts", u64::from(self.max_reconnect_attempts)),
            ("history_capacity", self.history_capacity as u64),
            ("outbound_capacity", self.outbound_capacity as u64),
            ("rules.starting_hp", u64::from(self.rules.starting_hp)),
            ("rules.field_limit", self.rules.field_limit as u64),
            ("rules.energy_cap", u64::from(self.rules.energy_cap)),
            ("rules.log_capacity", self.rules.log_capacity as u64),
        ];
        match positive.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }

    /// Rules with the configured turn length.
    pub fn rules(&self) -> RulesConfig {
        RulesConfig {
            turn_duration_ms: self.turn_duration_secs.saturating_mul(1000),
            ..self.rules.clone()
        }
    }

    /// Synchronizer timings.
    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            check_interval_ms: self.sync_interval_secs.saturating_mul(1000),
            conflict_window_ms: self.conflict_window_ms,
            resolution_timeout_ms: self.conflict_resolution_timeout_secs.saturating_mul(1000),
        }
    }

    /// Reconnection policy.
    pub fn reconnect(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_secs(self.reconnect_delay_secs),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Period of the follower hash check.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Period of heartbeats.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Acknowledgment window in milliseconds.
    pub fn ack_timeout_ms(&self) -> u64 {
        self.ack_timeout_secs.saturating_mul(1000)
    }

    /// Period of the turn clock.
    pub fn clock_tick(&self) -> Duration {
        Duration::from_millis(self.clock_tick_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = MatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_interval_secs, 10);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.rules.starting_hp, 20);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: MatchConfig = toml::from_str("").unwrap();
        assert_eq!(config, MatchConfig::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
sync_interval_secs = 2
ack_timeout_secs = 1
conflict_window_ms = 250

[rules]
starting_hp = 30
field_limit = 3
"#;
        let config: MatchConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sync_interval_secs, 2);
        assert_eq!(config.ack_timeout_ms(), 1_000);
        assert_eq!(config.sync().conflict_window_ms, 250);
        assert_eq!(config.rules.starting_hp, 30);
        assert_eq!(config.rules.field_limit, 3);
        // Untouched fields keep their defaults.
        assert_eq!(config.rules.energy_cap, 10);
        assert_eq!(config.outbound_capacity, 256);
    }

    #[test]
    fn turn_length_comes_from_top_level() {
        let config: MatchConfig = toml::from_str("turn_duration_secs = 45").unwrap();
        assert_eq!(config.rules().turn_duration_ms, 45_000);
    }

    #[test]
    fn derived_timings() {
        let config = MatchConfig::default();
        assert_eq!(config.sync().check_interval_ms, 10_000);
        assert_eq!(config.sync().resolution_timeout_ms, 5_000);
        assert_eq!(config.reconnect().delay, Duration::from_secs(5));
        assert_eq!(config.reconnect().max_attempts, 10);
        assert_eq!(config.clock_tick(), Duration::from_secs(1));
    }

    #[test]
    fn zero_values_are_rejected() {
        let config: MatchConfig = toml::from_str("max_reconnect_attempts = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_reconnect_attempts", .. })
        ));

        let config: MatchConfig = toml::from_str("[rules]\nfield_limit = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "rules.field_limit", .. })
        ));
    }

    #[test]
    fn from_file_loads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "heartbeat_interval_secs = 15").unwrap();

        let config = MatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sync_interval_secs = \"soon\"").unwrap();

        let result = MatchConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = MatchConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
