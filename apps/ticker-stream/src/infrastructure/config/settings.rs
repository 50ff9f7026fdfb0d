//! Service Configuration Settings
//!
//! Configuration types for the ticker stream service, loaded from environment
//! variables.

use std::time::Duration;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP API port.
    pub http_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Broadcast hub settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Per-session mailbox bound (0 = unbounded).
    pub mailbox_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 10_000,
        }
    }
}

/// Synthetic feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Shortest delay between two ticks of one ticker.
    pub min_interval: Duration,
    /// Longest delay between two ticks of one ticker.
    pub max_interval: Duration,
    /// Largest relative price move per tick (0.02 = ±2%).
    pub max_change_pct: f64,
    /// Exchange label stamped on every update.
    pub exchange: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(2000),
            max_interval: Duration::from_millis(5000),
            max_change_pct: 0.02,
            exchange: "BINANCE".to_string(),
        }
    }
}

impl FeedSettings {
    /// Check that the settings describe a usable tick schedule.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or inverted interval range, or a
    /// negative or non-finite change bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_STREAM_FEED_MAX_INTERVAL_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_STREAM_FEED_MIN_INTERVAL_MS",
                reason: format!(
                    "{}ms exceeds max interval {}ms",
                    self.min_interval.as_millis(),
                    self.max_interval.as_millis()
                ),
            });
        }
        if !self.max_change_pct.is_finite() || self.max_change_pct < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_STREAM_FEED_MAX_CHANGE_PCT",
                reason: format!("{} is not a non-negative number", self.max_change_pct),
            });
        }
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TICKER_STREAM_EXCHANGE".to_string()));
        }
        Ok(())
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Broadcast hub settings.
    pub broadcast: BroadcastSettings,
    /// Synthetic feed settings.
    pub feed: FeedSettings,
    /// Browser origin allowed by CORS.
    pub cors_origin: String,
    /// Raw ticker symbols to track at startup.
    pub initial_tickers: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broadcast: BroadcastSettings::default(),
            feed: FeedSettings::default(),
            cors_origin: "http://localhost:3000".to_string(),
            initial_tickers: Vec::new(),
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting settings are structurally invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting settings are structurally invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            http_port: parse_or(&lookup, "TICKER_STREAM_HTTP_PORT", defaults.server.http_port),
            health_port: parse_or(
                &lookup,
                "TICKER_STREAM_HEALTH_PORT",
                defaults.server.health_port,
            ),
        };

        let broadcast = BroadcastSettings {
            mailbox_capacity: parse_or(
                &lookup,
                "TICKER_STREAM_MAILBOX_CAPACITY",
                defaults.broadcast.mailbox_capacity,
            ),
        };

        let feed = FeedSettings {
            min_interval: parse_duration_millis(
                &lookup,
                "TICKER_STREAM_FEED_MIN_INTERVAL_MS",
                defaults.feed.min_interval,
            ),
            max_interval: parse_duration_millis(
                &lookup,
                "TICKER_STREAM_FEED_MAX_INTERVAL_MS",
                defaults.feed.max_interval,
            ),
            max_change_pct: parse_or(
                &lookup,
                "TICKER_STREAM_FEED_MAX_CHANGE_PCT",
                defaults.feed.max_change_pct,
            ),
            exchange: lookup("TICKER_STREAM_EXCHANGE").unwrap_or(defaults.feed.exchange),
        };
        feed.validate()?;

        let cors_origin = lookup("TICKER_STREAM_CORS_ORIGIN")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.cors_origin);

        let initial_tickers = lookup("TICKER_STREAM_INITIAL_TICKERS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        Ok(Self {
            server,
            broadcast,
            feed,
            cors_origin,
            initial_tickers,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds a value the service cannot run with.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Offending variable.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
