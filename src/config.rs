//! Process configuration, read from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `BIND_ADDR` | `0.0.0.0:8080` (`:port` means all interfaces) |
//! | `DATABASE_URL` | required |
//! | `SLOW_READER_POLICY` | `neglect` |
//! | `BROADCAST_ON_CONNECTION_LOSS` | `false` |
//! | `QUEUE_CAPACITY` | `256` |
//! | `KEEPALIVE_INTERVAL_SECS` | `60` |
//! | `RECONNECT_MIN_BACKOFF_MS` | `250` |
//! | `RECONNECT_MAX_BACKOFF_MS` | `3000` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::dispatch::{DispatcherConfig, SlowReaderPolicy, MIN_QUEUE_CAPACITY};
use crate::error::RelayError;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Everything the relay needs to start.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP listener address
    pub bind_addr: SocketAddr,
    /// Upstream Postgres connection string
    pub database_url: String,
    /// What to do with subscribers that cannot keep up (default: neglect)
    pub slow_reader_policy: SlowReaderPolicy,
    /// Send a marker to every subscriber when the upstream drops (default: false)
    pub broadcast_on_connection_loss: bool,
    /// Per-client queue capacity (default: 256)
    pub queue_capacity: usize,
    /// Upstream keepalive probe interval (default: 60s)
    pub keepalive_interval: Duration,
    /// First reconnect delay (default: 250ms)
    pub reconnect_min_backoff: Duration,
    /// Reconnect delay ceiling (default: 3s)
    pub reconnect_max_backoff: Duration,
    /// Capacity of the feed adapter's outbound event queue (default: 64)
    pub feed_event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: String::new(),
            slow_reader_policy: SlowReaderPolicy::Neglect,
            broadcast_on_connection_loss: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keepalive_interval: Duration::from_secs(60),
            reconnect_min_backoff: Duration::from_millis(250),
            reconnect_max_backoff: Duration::from_secs(3),
            feed_event_capacity: 64,
        }
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Load and validate from process environment variables.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load and validate using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = parse_bind_addr(&addr)?;
        }
        config.database_url = get("DATABASE_URL")
            .ok_or_else(|| RelayError::Config("DATABASE_URL is required".to_string()))?;
        if let Some(policy) = get("SLOW_READER_POLICY") {
            config.slow_reader_policy = policy.parse()?;
        }
        if let Some(flag) = get("BROADCAST_ON_CONNECTION_LOSS") {
            config.broadcast_on_connection_loss = parse_bool("BROADCAST_ON_CONNECTION_LOSS", &flag)?;
        }
        if let Some(capacity) = get("QUEUE_CAPACITY") {
            config.queue_capacity = parse_number("QUEUE_CAPACITY", &capacity)?;
        }
        if let Some(secs) = get("KEEPALIVE_INTERVAL_SECS") {
            config.keepalive_interval =
                Duration::from_secs(parse_number("KEEPALIVE_INTERVAL_SECS", &secs)?);
        }
        if let Some(ms) = get("RECONNECT_MIN_BACKOFF_MS") {
            config.reconnect_min_backoff =
                Duration::from_millis(parse_number("RECONNECT_MIN_BACKOFF_MS", &ms)?);
        }
        if let Some(ms) = get("RECONNECT_MAX_BACKOFF_MS") {
            config.reconnect_max_backoff =
                Duration::from_millis(parse_number("RECONNECT_MAX_BACKOFF_MS", &ms)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.database_url.trim().is_empty() {
            return Err(RelayError::Config("DATABASE_URL is required".to_string()));
        }
        let url = Url::parse(&self.database_url)
            .map_err(|e| RelayError::Config(format!("DATABASE_URL is malformed: {}", e)))?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(RelayError::Config(format!(
                "DATABASE_URL must use the postgres:// scheme, got {}://",
                url.scheme()
            )));
        }
        if self.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(RelayError::Config(format!(
                "QUEUE_CAPACITY must be at least {}",
                MIN_QUEUE_CAPACITY
            )));
        }
        if self.keepalive_interval.is_zero() {
            return Err(RelayError::Config(
                "KEEPALIVE_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        if self.reconnect_min_backoff.is_zero()
            || self.reconnect_max_backoff < self.reconnect_min_backoff
        {
            return Err(RelayError::Config(
                "reconnect backoff must satisfy 0 < RECONNECT_MIN_BACKOFF_MS <= RECONNECT_MAX_BACKOFF_MS"
                    .to_string(),
            ));
        }
        if self.feed_event_capacity == 0 {
            return Err(RelayError::Config("feed event capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            slow_reader_policy: self.slow_reader_policy,
            broadcast_on_connection_loss: self.broadcast_on_connection_loss,
        }
    }
}

fn parse_bind_addr(raw: &str) -> Result<SocketAddr, RelayError> {
    let raw = raw.trim();
    let full = if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw.to_string()
    };
    SocketAddr::from_str(&full)
        .map_err(|e| RelayError::Config(format!("BIND_ADDR {:?} is malformed: {}", raw, e)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, RelayError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RelayError::Config(format!("{} must be a boolean, got {:?}", key, other))),
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, RelayError> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}

/// Builder pattern for RelayConfig.
#[derive(Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn slow_reader_policy(mut self, policy: SlowReaderPolicy) -> Self {
        self.config.slow_reader_policy = policy;
        self
    }

    pub fn broadcast_on_connection_loss(mut self, enable: bool) -> Self {
        self.config.broadcast_on_connection_loss = enable;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    pub fn reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.reconnect_min_backoff = min;
        self.config.reconnect_max_backoff = max;
        self
    }

    /// Build the configuration without validating it.
    pub fn build(self) -> RelayConfig {
        self.config
    }
}
