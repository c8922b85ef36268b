//! Public trade history
//!
//! Buffers executed trades per instrument in a bounded chronological cache.
//! Trade entries are `[ID, MTS, AMOUNT, PRICE]`; a positive amount means the
//! taker bought, a negative amount that the taker sold.
//!
//! The feed delivers snapshots newest first and may repeat a trade (an
//! execution followed by its confirmation). The buffer keeps trades ordered
//! by (timestamp, id), oldest first, and holds each trade id at most once.

use std::collections::{HashMap, HashSet, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::channel::ChannelKind;
use types::ids::{Symbol, TradeId};
use types::numeric::{Price, Side};

use crate::decode::{classify, decimal_at, entry_fields, integer_at, require_fields, DecodeError, Payload};

const KIND: ChannelKind = ChannelKind::Trades;

/// Fields required in a trade entry.
pub const TRADE_FIELDS: usize = 4;

/// A public trade as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    /// Execution time, Unix millis.
    pub timestamp: i64,
    /// Signed amount: positive for taker buys, negative for taker sells.
    pub amount: Decimal,
    pub price: Price,
}

impl Trade {
    /// Taker side; `Bid` for a buy.
    pub fn taker_side(&self) -> Option<Side> {
        Side::of(self.amount)
    }

    /// Absolute traded size.
    pub fn size(&self) -> Decimal {
        self.amount.abs()
    }

    /// Trade value (price × size).
    pub fn value(&self) -> Decimal {
        self.price.as_decimal() * self.size()
    }

    fn from_fields(fields: &[Value]) -> Result<Self, DecodeError> {
        require_fields(KIND, fields, TRADE_FIELDS)?;
        Ok(Self {
            id: TradeId::new(integer_at(KIND, fields, 0)?),
            timestamp: integer_at(KIND, fields, 1)?,
            amount: decimal_at(KIND, fields, 2)?,
            price: Price::new(decimal_at(KIND, fields, 3)?),
        })
    }

    fn sort_key(&self) -> (i64, TradeId) {
        (self.timestamp, self.id)
    }
}

/// Decoded trades channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeMessage {
    Snapshot(Vec<Trade>),
    Update(Trade),
}

/// Decode a trades payload. Any malformed entry rejects the whole payload.
pub fn decode(payload: &Value) -> Result<TradeMessage, DecodeError> {
    match classify(KIND, payload)? {
        Payload::Snapshot(entries) => entries
            .iter()
            .map(|entry| Trade::from_fields(entry_fields(KIND, entry, TRADE_FIELDS)?))
            .collect::<Result<Vec<_>, _>>()
            .map(TradeMessage::Snapshot),
        Payload::Update(fields) => Trade::from_fields(fields).map(TradeMessage::Update),
    }
}

/// Bounded trade history for one instrument.
#[derive(Debug)]
pub struct TradeBuffer {
    /// Oldest first.
    history: VecDeque<Trade>,
    ids: HashSet<TradeId>,
    max_history: usize,
}

impl TradeBuffer {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_history),
            ids: HashSet::new(),
            max_history,
        }
    }

    /// Replace the history with `trades`, whatever order they arrive in.
    pub fn apply_snapshot(&mut self, mut trades: Vec<Trade>) {
        self.history.clear();
        self.ids.clear();

        trades.sort_by_key(Trade::sort_key);
        for trade in trades {
            if self.ids.insert(trade.id) {
                self.history.push_back(trade);
            }
        }
        self.trim_history();
    }

    /// Insert one trade in order. Returns false if the id is already held.
    pub fn record(&mut self, trade: Trade) -> bool {
        if self.ids.contains(&trade.id) {
            return false;
        }

        let key = trade.sort_key();
        let position = self.history.partition_point(|t| t.sort_key() <= key);
        self.ids.insert(trade.id);
        self.history.insert(position, trade);
        self.trim_history();
        true
    }

    pub fn apply(&mut self, message: TradeMessage) {
        match message {
            TradeMessage::Snapshot(trades) => self.apply_snapshot(trades),
            TradeMessage::Update(trade) => {
                self.record(trade);
            }
        }
    }

    /// All trades, oldest first.
    pub fn trades(&self) -> Vec<Trade> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Evict the oldest trades beyond `max_history`.
    fn trim_history(&mut self) {
        while self.history.len() > self.max_history {
            if let Some(evicted) = self.history.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
    }
}

/// Trade buffers for every instrument with a trades subscription.
#[derive(Debug)]
pub struct TradeStore {
    buffers: HashMap<Symbol, TradeBuffer>,
    max_history: usize,
}

impl TradeStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            max_history,
        }
    }

    pub fn apply(&mut self, symbol: &Symbol, message: TradeMessage) {
        let max_history = self.max_history;
        self.buffers
            .entry(symbol.clone())
            .or_insert_with(|| TradeBuffer::new(max_history))
            .apply(message);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&TradeBuffer> {
        self.buffers.get(symbol)
    }

    /// Trades for `symbol`, oldest first; empty when none are known.
    pub fn trades(&self, symbol: &Symbol) -> Vec<Trade> {
        self.buffers
            .get(symbol)
            .map(TradeBuffer::trades)
            .unwrap_or_default()
    }
}
