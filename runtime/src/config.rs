//! Environment-driven configuration for the dispatch core.
//!
//! Mirrors the teacher runtime's `Config::from_env()` / `Config::validate()`
//! shape: every field has a sane default, required credentials are fatal if
//! absent, and optional ones degrade with a warning.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub rpm: u32,
    pub capacity: usize,
    pub timeout: Duration,
}

impl LaneConfig {
    pub fn release_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.rpm as f64)
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub main_api_key: String,
    pub backup_api_key: String,
    pub memory_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chat_lane: LaneConfig,
    pub memory_lane: LaneConfig,
    pub worker_pool_size: usize,
    pub credentials: Credentials,
    pub max_history_rounds: usize,
    pub memory_trigger_every_n_turns: u64,
    pub embedding_dim: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let main_api_key = require_env("MAIN_API_KEY")?;
        let backup_api_key = require_env("BACKUP_API_KEY")?;
        let memory_api_key = env::var("MEMORY_API_KEY").ok().filter(|s| !s.is_empty());
        if memory_api_key.is_none() {
            tracing::warn!("MEMORY_API_KEY not set; memory lane will fall back to BACKUP");
        }

        let config = Self {
            chat_lane: LaneConfig {
                rpm: parse_env("CHAT_RPM_LIMIT", 250)?,
                capacity: parse_env("CHAT_QUEUE_SIZE", 1000)?,
                timeout: Duration::from_secs(parse_env("CHAT_TIMEOUT_SECONDS", 240)?),
            },
            memory_lane: LaneConfig {
                rpm: parse_env("MEMORY_RPM_LIMIT", 400)?,
                capacity: parse_env("MEMORY_QUEUE_SIZE", 500)?,
                timeout: Duration::from_secs(parse_env("MEMORY_TIMEOUT_SECONDS", 120)?),
            },
            worker_pool_size: parse_env("THREAD_POOL_MAX_WORKERS", 300)?,
            credentials: Credentials {
                main_api_key,
                backup_api_key,
                memory_api_key,
            },
            max_history_rounds: parse_env("MAX_HISTORY_ROUNDS", 3)?,
            memory_trigger_every_n_turns: parse_env("MEMORY_TRIGGER_EVERY_N_TURNS", 3)?,
            embedding_dim: 1536,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat_lane.rpm == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CHAT_RPM_LIMIT".into(),
                reason: "must be > 0".into(),
            });
        }
        if self.memory_lane.rpm == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MEMORY_RPM_LIMIT".into(),
                reason: "must be > 0".into(),
            });
        }
        if self.chat_lane.capacity == 0 || self.memory_lane.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "QUEUE_SIZE".into(),
                reason: "capacity must be >= 1".into(),
            });
        }
        if self.max_history_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_HISTORY_ROUNDS".into(),
                reason: "must be > 0".into(),
            });
        }
        if self.memory_trigger_every_n_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MEMORY_TRIGGER_EVERY_N_TURNS".into(),
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingRequired(key.to_string()))
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            reason: "could not parse value".to_string(),
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "MAIN_API_KEY",
            "BACKUP_API_KEY",
            "MEMORY_API_KEY",
            "CHAT_RPM_LIMIT",
            "CHAT_QUEUE_SIZE",
            "CHAT_TIMEOUT_SECONDS",
            "MEMORY_RPM_LIMIT",
            "MEMORY_QUEUE_SIZE",
            "MEMORY_TIMEOUT_SECONDS",
            "THREAD_POOL_MAX_WORKERS",
            "MAX_HISTORY_ROUNDS",
            "MEMORY_TRIGGER_EVERY_N_TURNS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn missing_main_key_is_fatal() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(k) if k == "MAIN_API_KEY"));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        clear_env();
        env::set_var("MAIN_API_KEY", "main-key");
        env::set_var("BACKUP_API_KEY", "backup-key");
        let config = Config::from_env().unwrap();
        assert_eq!(config.chat_lane.rpm, 250);
        assert_eq!(config.memory_lane.capacity, 500);
        assert_eq!(config.max_history_rounds, 3);
        assert!(config.credentials.memory_api_key.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn zero_rpm_fails_validation() {
        clear_env();
        env::set_var("MAIN_API_KEY", "main-key");
        env::set_var("BACKUP_API_KEY", "backup-key");
        env::set_var("CHAT_RPM_LIMIT", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "CHAT_RPM_LIMIT"));
        clear_env();
    }
}
