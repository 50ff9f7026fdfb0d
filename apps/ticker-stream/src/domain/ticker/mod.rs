//! Ticker and Price Types
//!
//! Core value types for price streaming: the canonical [`Ticker`] symbol
//! and the immutable [`PriceUpdate`] observation.
//!
//! # Canonical Form
//!
//! A ticker is uppercase, non-empty and contains no whitespace. Input is
//! trimmed and uppercased before validation, so `" btcusd "` and `"BTCUSD"`
//! name the same ticker while `"BTC USD"` is rejected.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Ticker
// =============================================================================

/// Canonical symbol identifying a tracked instrument.
///
/// Ordering is lexicographic on the canonical string, which gives the
/// sorted listing order of the active ticker set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Canonicalize and validate a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::InvalidSymbol`] if the symbol is empty after
    /// trimming or contains internal whitespace.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ticker_stream::domain::ticker::Ticker;
    ///
    /// let ticker = Ticker::parse(" btcusd ").unwrap();
    /// assert_eq!(ticker.as_str(), "BTCUSD");
    /// assert!(Ticker::parse("   ").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, TickerError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(TickerError::InvalidSymbol {
                input: raw.to_string(),
                reason: "symbol is empty",
            });
        }

        if trimmed.chars().any(char::is_whitespace) {
            return Err(TickerError::InvalidSymbol {
                input: raw.to_string(),
                reason: "symbol contains whitespace",
            });
        }

        Ok(Self(trimmed.to_uppercase()))
    }

    /// Get the canonical symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the ticker and return the canonical string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Ticker {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Ticker {
    type Err = TickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Ticker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Ticker validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    /// Symbol is empty or malformed after canonicalization.
    #[error("invalid symbol {input:?}: {reason}")]
    InvalidSymbol {
        /// The raw input as received.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

// =============================================================================
// Price Update
// =============================================================================

/// One immutable price observation for a ticker.
///
/// Fields are private so an update cannot be altered once constructed;
/// clones are handed to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    ticker: Ticker,
    price: f64,
    timestamp: i64,
    exchange: String,
}

impl PriceUpdate {
    /// Create a new price update.
    ///
    /// `timestamp` is milliseconds since the Unix epoch. Positive prices
    /// are expected but not enforced.
    #[must_use]
    pub fn new(ticker: Ticker, price: f64, timestamp: i64, exchange: impl Into<String>) -> Self {
        Self {
            ticker,
            price,
            timestamp,
            exchange: exchange.into(),
        }
    }

    /// The ticker this price belongs to.
    #[must_use]
    pub const fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// The observed price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Observation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Exchange the price was observed on.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

// =============================================================================
// Tests
// =============================================================================
