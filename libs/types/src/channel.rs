//! Channel kinds and their parameters
//!
//! A channel is one category of market data for one instrument. Candle
//! channels are parameterised by a timeframe, book channels by a price
//! aggregation precision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::TypeError;
use crate::ids::Symbol;

/// Category of market data carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Ticker,
    Trades,
    Candles,
    Book,
}

impl ChannelKind {
    /// Name used in the `channel` field of wire messages.
    pub fn as_wire(&self) -> &'static str {
        match self {
            ChannelKind::Ticker => "ticker",
            ChannelKind::Trades => "trades",
            ChannelKind::Candles => "candles",
            ChannelKind::Book => "book",
        }
    }

    pub fn from_wire(name: &str) -> Result<Self, TypeError> {
        match name {
            "ticker" => Ok(ChannelKind::Ticker),
            "trades" => Ok(ChannelKind::Trades),
            "candles" => Ok(ChannelKind::Candles),
            "book" => Ok(ChannelKind::Book),
            other => Err(TypeError::UnknownChannel(other.to_string())),
        }
    }

    /// All channel kinds.
    pub fn all() -> &'static [ChannelKind] {
        &[
            ChannelKind::Ticker,
            ChannelKind::Trades,
            ChannelKind::Candles,
            ChannelKind::Book,
        ]
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
    /// 3 hours
    H3,
    /// 6 hours
    H6,
    /// 12 hours
    H12,
    /// 1 day
    D1,
    /// 1 week
    W1,
    /// 14 days
    D14,
    /// 1 month
    Mo1,
}

impl Timeframe {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H3 => "3h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1D",
            Timeframe::W1 => "1W",
            Timeframe::D14 => "14D",
            Timeframe::Mo1 => "1M",
        }
    }

    pub fn from_wire(text: &str) -> Result<Self, TypeError> {
        Self::all()
            .iter()
            .copied()
            .find(|tf| tf.as_wire() == text)
            .ok_or_else(|| TypeError::UnknownTimeframe(text.to_string()))
    }

    /// All supported timeframes.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H3,
            Timeframe::H6,
            Timeframe::H12,
            Timeframe::D1,
            Timeframe::W1,
            Timeframe::D14,
            Timeframe::Mo1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Price aggregation level of a book channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum BookPrecision {
    /// Five significant figures
    #[default]
    P0,
    P1,
    P2,
    P3,
    /// One significant figure
    P4,
}

impl BookPrecision {
    pub fn as_wire(&self) -> &'static str {
        match self {
            BookPrecision::P0 => "P0",
            BookPrecision::P1 => "P1",
            BookPrecision::P2 => "P2",
            BookPrecision::P3 => "P3",
            BookPrecision::P4 => "P4",
        }
    }

    pub fn from_wire(text: &str) -> Result<Self, TypeError> {
        match text {
            "P0" => Ok(BookPrecision::P0),
            "P1" => Ok(BookPrecision::P1),
            "P2" => Ok(BookPrecision::P2),
            "P3" => Ok(BookPrecision::P3),
            "P4" => Ok(BookPrecision::P4),
            other => Err(TypeError::UnknownPrecision(other.to_string())),
        }
    }
}

impl fmt::Display for BookPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Build the candle channel key: `trade:<timeframe>:t<SYMBOL>`.
pub fn candle_key(timeframe: Timeframe, symbol: &Symbol) -> String {
    format!("trade:{}:{}", timeframe.as_wire(), symbol.to_wire())
}

/// Split a candle channel key back into timeframe and symbol.
pub fn parse_candle_key(key: &str) -> Result<(Timeframe, Symbol), TypeError> {
    let parts: Vec<&str> = key.splitn(3, ':').collect();
    match parts.as_slice() {
        ["trade", timeframe, symbol] => {
            let timeframe = Timeframe::from_wire(timeframe)?;
            let symbol = Symbol::from_wire(symbol)
                .ok_or_else(|| TypeError::InvalidCandleKey(key.to_string()))?;
            Ok((timeframe, symbol))
        }
        _ => Err(TypeError::InvalidCandleKey(key.to_string())),
    }
}
