//! Ticker channel
//!
//! A ticker payload is a single flat record of ten numbers:
//! `[BID, BID_SIZE, ASK, ASK_SIZE, DAILY_CHANGE, DAILY_CHANGE_RELATIVE,
//! LAST_PRICE, VOLUME, HIGH, LOW]`. Each payload fully replaces the stored
//! record for its instrument.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::channel::ChannelKind;
use types::ids::Symbol;

use crate::decode::{classify, decimal_at, require_fields, DecodeError, Payload};

const KIND: ChannelKind = ChannelKind::Ticker;

/// Fields in a ticker record.
pub const TICKER_FIELDS: usize = 10;

/// Latest top-of-book and daily statistics for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Decimal,
    pub bid_size: Decimal,
    pub ask: Decimal,
    pub ask_size: Decimal,
    pub daily_change: Decimal,
    pub daily_change_relative: Decimal,
    pub last_price: Decimal,
    pub volume: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

impl Ticker {
    /// Decode a ticker payload. Snapshot-shaped payloads are malformed.
    pub fn decode(payload: &Value) -> Result<Self, DecodeError> {
        let fields = match classify(KIND, payload)? {
            Payload::Update(fields) => fields,
            Payload::Snapshot(_) => return Err(DecodeError::UnexpectedSnapshot { kind: KIND }),
        };
        require_fields(KIND, fields, TICKER_FIELDS)?;

        Ok(Self {
            bid: decimal_at(KIND, fields, 0)?,
            bid_size: decimal_at(KIND, fields, 1)?,
            ask: decimal_at(KIND, fields, 2)?,
            ask_size: decimal_at(KIND, fields, 3)?,
            daily_change: decimal_at(KIND, fields, 4)?,
            daily_change_relative: decimal_at(KIND, fields, 5)?,
            last_price: decimal_at(KIND, fields, 6)?,
            volume: decimal_at(KIND, fields, 7)?,
            high: decimal_at(KIND, fields, 8)?,
            low: decimal_at(KIND, fields, 9)?,
        })
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// A ticker together with the close prices of one candle series, for
/// overview rows that draw a price sparkline next to the quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerWithCloses {
    pub symbol: Symbol,
    pub ticker: Ticker,
    /// Oldest first; empty when no candles are known.
    pub closes: Vec<Decimal>,
}

/// Latest ticker per instrument.
#[derive(Debug, Default)]
pub struct TickerStore {
    tickers: HashMap<Symbol, Ticker>,
}

impl TickerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `symbol`.
    pub fn replace(&mut self, symbol: &Symbol, ticker: Ticker) {
        self.tickers.insert(symbol.clone(), ticker);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Ticker> {
        self.tickers.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}
