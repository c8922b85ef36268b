//! Identifier types for feed entities
//!
//! Instruments are plain exchange tickers (`BTCUSD`). On the wire, trading
//! pairs carry a `t` prefix (`tBTCUSD`); conversion happens only at the
//! protocol boundary so the rest of the client never sees the prefix.
//!
//! Channel ids are assigned by the remote endpoint when it acknowledges a
//! subscription. They are only meaningful for the lifetime of one connection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix the feed puts in front of trading-pair symbols.
pub const TRADING_PAIR_PREFIX: char = 't';

/// Instrument identifier (trading pair)
///
/// Format: exchange ticker without the wire prefix (e.g., "BTCUSD",
/// "TESTBTC:TESTUSD").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    ///
    /// # Panics
    /// Panics if the symbol is empty or contains characters other than ASCII
    /// alphanumerics and ':'
    pub fn new(symbol: impl Into<String>) -> Self {
        let s = symbol.into();
        assert!(Self::is_valid(&s), "Symbol must be non-empty ASCII alphanumeric");
        Self(s)
    }

    /// Try to create a Symbol, returning None if invalid
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Parse the wire form (`tBTCUSD`) back into a Symbol.
    pub fn from_wire(wire: &str) -> Option<Self> {
        wire.strip_prefix(TRADING_PAIR_PREFIX)
            .and_then(|s| Self::try_new(s))
    }

    /// Wire form used in subscribe requests (`tBTCUSD`).
    pub fn to_wire(&self) -> String {
        format!("{}{}", TRADING_PAIR_PREFIX, self.0)
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == ':')
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Channel identifier assigned by the remote feed on subscription ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade identifier as delivered by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(i64);

impl TradeId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
