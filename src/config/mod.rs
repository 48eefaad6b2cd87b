//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// What other clients hear when a session drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// The player simply vanishes from the next snapshot
    #[default]
    Silent,
    /// A `DEAD:<name>` line goes out if the player was still fighting
    Announce,
}

impl FromStr for DisconnectPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "announce" => Ok(Self::Announce),
            _ => Err(()),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Game protocol binding address
    pub server_addr: SocketAddr,
    /// Optional HTTP status binding address
    pub status_addr: Option<SocketAddr>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Snapshot broadcast period (also drives the win check)
    pub broadcast_interval: Duration,
    /// Lifecycle controller period
    pub lifecycle_interval: Duration,
    /// Ready players needed before a match starts
    pub min_players: usize,

    /// Max command lines per second per session, 0 disables the limiter
    pub input_rate_limit: u32,
    /// Idle read timeout, `None` waits forever
    pub read_timeout: Option<Duration>,
    pub disconnect_policy: DisconnectPolicy,
    /// Seed for spawn positions, random when absent
    pub world_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 12345)),
            status_addr: None,
            log_level: "info".to_string(),
            broadcast_interval: Duration::from_millis(50),
            lifecycle_interval: Duration::from_millis(100),
            min_players: 3,
            input_rate_limit: 0,
            read_timeout: None,
            disconnect_policy: DisconnectPolicy::Silent,
            world_seed: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // PORT wins over SERVER_ADDR
        let server_addr = match (lookup("PORT"), lookup("SERVER_ADDR")) {
            (Some(port), _) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            (None, Some(addr)) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
            (None, None) => defaults.server_addr,
        };

        let status_addr = lookup("STATUS_ADDR")
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse().map_err(|_| ConfigError::InvalidAddress))
            .transpose()?;

        let broadcast_ms = parse_or(&lookup, "BROADCAST_INTERVAL_MS", 50u64)?;
        let lifecycle_ms = parse_or(&lookup, "LIFECYCLE_INTERVAL_MS", 100u64)?;
        if broadcast_ms == 0 {
            return Err(ConfigError::invalid("BROADCAST_INTERVAL_MS", "0"));
        }
        if lifecycle_ms == 0 {
            return Err(ConfigError::invalid("LIFECYCLE_INTERVAL_MS", "0"));
        }

        let min_players = parse_or(&lookup, "MIN_PLAYERS", defaults.min_players)?;
        // A match needs two fighters to be decidable
        if min_players < 2 {
            return Err(ConfigError::invalid("MIN_PLAYERS", &min_players.to_string()));
        }

        let read_timeout = lookup("READ_TIMEOUT_SECS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or_else(|| ConfigError::invalid("READ_TIMEOUT_SECS", &raw))
            })
            .transpose()?;

        let disconnect_policy = match lookup("DISCONNECT_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::invalid("DISCONNECT_POLICY", &raw))?,
            None => defaults.disconnect_policy,
        };

        let world_seed = lookup("WORLD_SEED")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::invalid("WORLD_SEED", &raw))
            })
            .transpose()?;

        Ok(Self {
            server_addr,
            status_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            broadcast_interval: Duration::from_millis(broadcast_ms),
            lifecycle_interval: Duration::from_millis(lifecycle_ms),
            min_players,
            input_rate_limit: parse_or(&lookup, "INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
            read_timeout,
            disconnect_policy,
            world_seed,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::invalid(key, &raw)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
        }
    }
}
