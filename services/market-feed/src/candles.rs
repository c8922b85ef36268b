//! OHLCV candle series
//!
//! Candles arrive from the feed already aggregated; this module only mirrors
//! them. Entries are `[MTS, OPEN, CLOSE, HIGH, LOW, VOLUME]`.
//!
//! Each (instrument, timeframe) series is keyed by open time in a `BTreeMap`,
//! so an update for an existing open time replaces that candle and a new open
//! time extends the series. Applying the same entry twice leaves the series
//! unchanged.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::channel::{ChannelKind, Timeframe};
use types::ids::Symbol;

use crate::decode::{classify, decimal_at, entry_fields, integer_at, require_fields, DecodeError, Payload};

const KIND: ChannelKind = ChannelKind::Candles;

/// Fields required in a candle entry.
pub const CANDLE_FIELDS: usize = 6;

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, Unix millis.
    pub timestamp: i64,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
}

impl Candle {
    fn from_fields(fields: &[Value]) -> Result<Self, DecodeError> {
        require_fields(KIND, fields, CANDLE_FIELDS)?;
        Ok(Self {
            timestamp: integer_at(KIND, fields, 0)?,
            open: decimal_at(KIND, fields, 1)?,
            close: decimal_at(KIND, fields, 2)?,
            high: decimal_at(KIND, fields, 3)?,
            low: decimal_at(KIND, fields, 4)?,
            volume: decimal_at(KIND, fields, 5)?,
        })
    }
}

/// Decoded candles channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandleMessage {
    Snapshot(Vec<Candle>),
    Update(Candle),
}

/// Decode a candles payload. Any malformed entry rejects the whole payload.
pub fn decode(payload: &Value) -> Result<CandleMessage, DecodeError> {
    match classify(KIND, payload)? {
        Payload::Snapshot(entries) => entries
            .iter()
            .map(|entry| Candle::from_fields(entry_fields(KIND, entry, CANDLE_FIELDS)?))
            .collect::<Result<Vec<_>, _>>()
            .map(CandleMessage::Snapshot),
        Payload::Update(fields) => Candle::from_fields(fields).map(CandleMessage::Update),
    }
}

/// Candles for one instrument and timeframe, keyed by open time.
#[derive(Debug)]
pub struct CandleSeries {
    candles: BTreeMap<i64, Candle>,
    max_history: usize,
}

impl CandleSeries {
    pub fn new(max_history: usize) -> Self {
        Self {
            candles: BTreeMap::new(),
            max_history,
        }
    }

    /// Replace the series with `candles`.
    pub fn apply_snapshot(&mut self, candles: Vec<Candle>) {
        self.candles.clear();
        for candle in candles {
            self.candles.insert(candle.timestamp, candle);
        }
        self.trim_history();
    }

    /// Replace the candle with the same open time, or add a new one.
    pub fn upsert(&mut self, candle: Candle) {
        self.candles.insert(candle.timestamp, candle);
        self.trim_history();
    }

    pub fn apply(&mut self, message: CandleMessage) {
        match message {
            CandleMessage::Snapshot(candles) => self.apply_snapshot(candles),
            CandleMessage::Update(candle) => self.upsert(candle),
        }
    }

    /// Candles in ascending open-time order.
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.values().cloned().collect()
    }

    /// Most recent candle.
    pub fn latest(&self) -> Option<&Candle> {
        self.candles.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Trim history to max_history, dropping the oldest candles.
    fn trim_history(&mut self) {
        while self.candles.len() > self.max_history {
            self.candles.pop_first();
        }
    }
}

/// Candle series for every (instrument, timeframe) with a subscription.
#[derive(Debug)]
pub struct CandleStore {
    series: HashMap<(Symbol, Timeframe), CandleSeries>,
    max_history: usize,
}

impl CandleStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            series: HashMap::new(),
            max_history,
        }
    }

    pub fn apply(&mut self, symbol: &Symbol, timeframe: Timeframe, message: CandleMessage) {
        let max_history = self.max_history;
        self.series
            .entry((symbol.clone(), timeframe))
            .or_insert_with(|| CandleSeries::new(max_history))
            .apply(message);
    }

    pub fn get(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&CandleSeries> {
        self.series.get(&(symbol.clone(), timeframe))
    }

    /// Candles in ascending open-time order; empty when none are known.
    pub fn candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<Candle> {
        self.get(symbol, timeframe)
            .map(CandleSeries::candles)
            .unwrap_or_default()
    }
}
