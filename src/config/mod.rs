//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::rewind::{DamageTable, HitStrategy, RewindConfig};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated, `*` for any
    pub client_origin: String,
    pub max_players_per_match: usize,
    /// Rewind and hit confirmation tunables
    pub rewind: RewindConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = RewindConfig::default();
        let damage = DamageTable {
            legs: parse_or(&lookup, "LEGS_MULTIPLIER", defaults.damage.legs)?,
            body: parse_or(&lookup, "BODY_MULTIPLIER", defaults.damage.body)?,
            head: parse_or(&lookup, "HEAD_MULTIPLIER", defaults.damage.head)?,
            ..defaults.damage
        };
        let rewind = RewindConfig {
            max_record_time: parse_or(&lookup, "MAX_RECORD_TIME", defaults.max_record_time)?,
            max_spheres_hit: parse_or(&lookup, "MAX_SPHERES_HIT", defaults.max_spheres_hit)?,
            strategy: parse_or::<HitStrategy>(&lookup, "HIT_STRATEGY", defaults.strategy)?,
            trace_extension: parse_or(&lookup, "TRACE_EXTENSION", defaults.trace_extension)?,
            damage,
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            max_players_per_match: parse_or(&lookup, "MAX_PLAYERS_PER_MATCH", 16)?,
            rewind,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let rewind = &self.rewind;
        if !(rewind.max_record_time > 0.0) {
            return Err(invalid("MAX_RECORD_TIME", rewind.max_record_time));
        }
        if rewind.max_spheres_hit == 0 {
            return Err(invalid("MAX_SPHERES_HIT", rewind.max_spheres_hit));
        }
        if !(rewind.trace_extension >= 1.0) {
            return Err(invalid("TRACE_EXTENSION", rewind.trace_extension));
        }
        for (key, value) in [
            ("LEGS_MULTIPLIER", rewind.damage.legs),
            ("BODY_MULTIPLIER", rewind.damage.body),
            ("HEAD_MULTIPLIER", rewind.damage.head),
        ] {
            if !(value >= 0.0) {
                return Err(invalid(key, value));
            }
        }
        if self.max_players_per_match < 2 {
            return Err(invalid("MAX_PLAYERS_PER_MATCH", self.max_players_per_match));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}
