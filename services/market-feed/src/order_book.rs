//! In-memory order book mirror
//!
//! Maintains one price-sorted book per instrument from book channel
//! snapshots and deltas. Uses `BTreeMap` keyed by `Price` for deterministic
//! sorted iteration; all arithmetic uses `Decimal`.
//!
//! Wire entries are `[PRICE, AMOUNT, ...]`:
//! - positive amount: bid level, negative amount: ask level
//! - zero amount: delete the level at that price (no-op if absent)
//! - trailing fields are ignored
//!
//! A snapshot replaces the whole book; a delta touches exactly one price.
//! Consumer views (ladder, depth curve) are derived on demand.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::channel::ChannelKind;
use types::ids::Symbol;
use types::numeric::{Price, Side};

use crate::decode::{classify, decimal_at, entry_fields, require_fields, DecodeError, Payload};

const KIND: ChannelKind = ChannelKind::Book;

/// Fields required in a book entry.
pub const BOOK_ENTRY_FIELDS: usize = 2;

/// A single price level. The sign of `amount` gives the side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    /// Signed amount: positive for bids, negative for asks.
    pub amount: Decimal,
}

impl PriceLevel {
    pub fn new(price: Price, amount: Decimal) -> Self {
        Self { price, amount }
    }

    /// Side of the level; `None` for a zero amount (deletion marker).
    pub fn side(&self) -> Option<Side> {
        Side::of(self.amount)
    }

    /// Absolute size resting at this level.
    pub fn size(&self) -> Decimal {
        self.amount.abs()
    }

    fn from_fields(fields: &[Value]) -> Result<Self, DecodeError> {
        require_fields(KIND, fields, BOOK_ENTRY_FIELDS)?;
        Ok(Self {
            price: Price::new(decimal_at(KIND, fields, 0)?),
            amount: decimal_at(KIND, fields, 1)?,
        })
    }
}

/// Decoded book channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookMessage {
    Snapshot(Vec<PriceLevel>),
    Update(PriceLevel),
}

/// Decode a book payload. Any malformed entry rejects the whole payload.
pub fn decode(payload: &Value) -> Result<BookMessage, DecodeError> {
    match classify(KIND, payload)? {
        Payload::Snapshot(entries) => entries
            .iter()
            .map(|entry| PriceLevel::from_fields(entry_fields(KIND, entry, BOOK_ENTRY_FIELDS)?))
            .collect::<Result<Vec<_>, _>>()
            .map(BookMessage::Snapshot),
        Payload::Update(fields) => PriceLevel::from_fields(fields).map(BookMessage::Update),
    }
}

/// Price-sorted book for one instrument.
///
/// Bids are the levels with positive amount, asks the levels with negative
/// amount; both live in one map, so a price holds at most one level.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    levels: BTreeMap<Price, Decimal>,
    updates_applied: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole book. Zero-amount entries are skipped.
    pub fn apply_snapshot(&mut self, levels: Vec<PriceLevel>) {
        self.levels.clear();
        for level in levels {
            if level.amount != Decimal::ZERO {
                self.levels.insert(level.price, level.amount);
            }
        }
        self.updates_applied += 1;
    }

    /// Upsert or delete the level at `level.price`. No other price changes.
    pub fn apply_delta(&mut self, level: PriceLevel) {
        if level.amount == Decimal::ZERO {
            self.levels.remove(&level.price);
        } else {
            self.levels.insert(level.price, level.amount);
        }
        self.updates_applied += 1;
    }

    pub fn apply(&mut self, message: BookMessage) {
        match message {
            BookMessage::Snapshot(levels) => self.apply_snapshot(levels),
            BookMessage::Update(level) => self.apply_delta(level),
        }
    }

    /// Highest bid price.
    pub fn best_bid(&self) -> Option<Price> {
        self.bids().next().map(|level| level.price)
    }

    /// Lowest ask price.
    pub fn best_ask(&self) -> Option<Price> {
        self.asks().next().map(|level| level.price)
    }

    /// Get the mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some((bid.as_decimal() + ask.as_decimal()) / Decimal::from(2))
            }
            _ => None,
        }
    }

    /// Get the spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.as_decimal() - bid.as_decimal()),
            _ => None,
        }
    }

    /// Number of bid price levels.
    pub fn bid_count(&self) -> usize {
        self.bids().count()
    }

    /// Number of ask price levels.
    pub fn ask_count(&self) -> usize {
        self.asks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Snapshots and deltas applied since creation.
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    /// Bid levels, best (highest price) first.
    pub fn bids(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.levels
            .iter()
            .rev()
            .filter(|(_, amount)| **amount > Decimal::ZERO)
            .map(|(price, amount)| PriceLevel::new(*price, *amount))
    }

    /// Ask levels, best (lowest price) first.
    pub fn asks(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.levels
            .iter()
            .filter(|(_, amount)| **amount < Decimal::ZERO)
            .map(|(price, amount)| PriceLevel::new(*price, *amount))
    }

    /// Build the ladder view with exactly `depth` rows.
    ///
    /// Row `i` pairs the i-th best bid with the i-th best ask. Cumulative
    /// depths run from the top of the book outward and `max_depth` is the
    /// combined size of both displayed sides, so every row shares the same
    /// scale.
    pub fn ladder(&self, depth: usize) -> Ladder {
        let bids: Vec<PriceLevel> = self.bids().take(depth).collect();
        let asks: Vec<PriceLevel> = self.asks().take(depth).collect();

        let max_depth: Decimal = bids.iter().chain(asks.iter()).map(PriceLevel::size).sum();

        let mut bid_depth = Decimal::ZERO;
        let mut ask_depth = Decimal::ZERO;
        let rows = (0..depth)
            .map(|id| {
                let bid = bids.get(id).cloned();
                let ask = asks.get(id).cloned();
                if let Some(level) = &bid {
                    bid_depth += level.size();
                }
                if let Some(level) = &ask {
                    ask_depth += level.size();
                }
                LadderRow {
                    id,
                    bid,
                    ask,
                    bid_depth,
                    ask_depth,
                    max_depth,
                }
            })
            .collect();

        Ladder { rows }
    }

    /// Build the depth curve over every level in the book.
    ///
    /// Both sides are ascending by price. A bid point carries the total bid
    /// size at or above its price; an ask point the total ask size at or
    /// below its price.
    pub fn depth_curve(&self) -> DepthCurve {
        let mut bids: Vec<DepthPoint> = Vec::new();
        let mut running = Decimal::ZERO;
        for level in self.bids() {
            running += level.size();
            bids.push(DepthPoint {
                price: level.price,
                depth: running,
            });
        }
        bids.reverse();

        let mut asks: Vec<DepthPoint> = Vec::new();
        let mut running = Decimal::ZERO;
        for level in self.asks() {
            running += level.size();
            asks.push(DepthPoint {
                price: level.price,
                depth: running,
            });
        }

        DepthCurve { bids, asks }
    }
}

/// One row of the ladder view. `id` is the row index and stays stable
/// across updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderRow {
    pub id: usize,
    pub bid: Option<PriceLevel>,
    pub ask: Option<PriceLevel>,
    /// Bid size from the best bid down to this row, inclusive.
    pub bid_depth: Decimal,
    /// Ask size from the best ask up to this row, inclusive.
    pub ask_depth: Decimal,
    /// Combined size of all displayed bid and ask levels.
    pub max_depth: Decimal,
}

/// Fixed-size ladder view of the top of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ladder {
    pub rows: Vec<LadderRow>,
}

impl Ladder {
    /// Ladder for an instrument with no book: all rows empty.
    pub fn empty(depth: usize) -> Self {
        OrderBook::new().ladder(depth)
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.rows.first().and_then(|row| row.bid.as_ref())
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.rows.first().and_then(|row| row.ask.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.bid.is_none() && row.ask.is_none())
    }
}

/// A cumulative depth point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthPoint {
    pub price: Price,
    pub depth: Decimal,
}

/// Cumulative depth per side, each ascending by price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthCurve {
    pub bids: Vec<DepthPoint>,
    pub asks: Vec<DepthPoint>,
}

/// Books for every instrument with a book subscription.
#[derive(Debug, Default)]
pub struct BookStore {
    books: HashMap<Symbol, OrderBook>,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, symbol: &Symbol, message: BookMessage) {
        self.books.entry(symbol.clone()).or_default().apply(message);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    /// Ladder for `symbol`; all rows empty when no book is known.
    pub fn ladder(&self, symbol: &Symbol, depth: usize) -> Ladder {
        self.books
            .get(symbol)
            .map(|book| book.ladder(depth))
            .unwrap_or_else(|| Ladder::empty(depth))
    }

    /// Depth curve for `symbol`; empty when no book is known.
    pub fn depth_curve(&self, symbol: &Symbol) -> DepthCurve {
        self.books
            .get(symbol)
            .map(OrderBook::depth_curve)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
