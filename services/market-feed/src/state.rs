//! Shared market state
//!
//! One `RwLock` per store so consumers reading tickers never wait on a book
//! write. The feed processor is the only writer. Every applied payload bumps
//! a generation counter that throttled views watch.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::watch;
use types::channel::{ChannelKind, Timeframe};
use types::ids::Symbol;

use crate::candles::{self, Candle, CandleStore};
use crate::config::FeedConfig;
use crate::decode::DecodeError;
use crate::order_book::{self, BookStore, DepthCurve, Ladder};
use crate::subscription::Subscription;
use crate::ticker::{Ticker, TickerStore, TickerWithCloses};
use crate::trades::{self, Trade, TradeStore};

/// Per-instrument market state, shared by `Arc`.
pub struct MarketState {
    tickers: RwLock<TickerStore>,
    trades: RwLock<TradeStore>,
    candles: RwLock<CandleStore>,
    books: RwLock<BookStore>,
    ladder_depth: usize,
    generation: watch::Sender<u64>,
}

impl MarketState {
    pub fn new(config: &FeedConfig) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            tickers: RwLock::new(TickerStore::new()),
            trades: RwLock::new(TradeStore::new(config.max_trades)),
            candles: RwLock::new(CandleStore::new(config.max_candles)),
            books: RwLock::new(BookStore::new()),
            ladder_depth: config.ladder_depth,
            generation,
        }
    }

    /// Latest ticker, or `None` before the first update.
    pub fn ticker(&self, symbol: &Symbol) -> Option<Ticker> {
        read(&self.tickers).get(symbol).cloned()
    }

    /// Ladder with exactly the configured number of rows.
    pub fn ladder(&self, symbol: &Symbol) -> Ladder {
        read(&self.books).ladder(symbol, self.ladder_depth)
    }

    pub fn depth_curve(&self, symbol: &Symbol) -> DepthCurve {
        read(&self.books).depth_curve(symbol)
    }

    /// Candles in ascending open-time order.
    pub fn candles(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<Candle> {
        read(&self.candles).candles(symbol, timeframe)
    }

    /// Ticker joined with the candle closes for `timeframe`, or `None`
    /// before the first ticker update.
    pub fn ticker_with_closes(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<TickerWithCloses> {
        let ticker = self.ticker(symbol)?;
        let closes = self
            .candles(symbol, timeframe)
            .into_iter()
            .map(|candle| candle.close)
            .collect();
        Some(TickerWithCloses {
            symbol: symbol.clone(),
            ticker,
            closes,
        })
    }

    /// `ticker_with_closes` for each symbol, skipping those without a ticker.
    pub fn tickers_with_closes(&self, symbols: &[Symbol], timeframe: Timeframe) -> Vec<TickerWithCloses> {
        symbols
            .iter()
            .filter_map(|symbol| self.ticker_with_closes(symbol, timeframe))
            .collect()
    }

    /// Trades, oldest first.
    pub fn trades(&self, symbol: &Symbol) -> Vec<Trade> {
        read(&self.trades).trades(symbol)
    }

    pub fn ladder_depth(&self) -> usize {
        self.ladder_depth
    }

    /// Number of payloads applied so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Receiver notified after every applied payload.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Decode `payload` with the decoder for `subscription` and apply it.
    /// Nothing is written when decoding fails.
    pub(crate) fn apply(&self, subscription: &Subscription, payload: &Value) -> Result<(), DecodeError> {
        let symbol = subscription.symbol();
        match subscription.kind() {
            ChannelKind::Ticker => {
                let ticker = Ticker::decode(payload)?;
                write(&self.tickers).replace(symbol, ticker);
            }
            ChannelKind::Trades => {
                let message = trades::decode(payload)?;
                write(&self.trades).apply(symbol, message);
            }
            ChannelKind::Candles => {
                let Some(timeframe) = subscription.timeframe() else {
                    debug_assert!(false, "candle payload routed to {}", subscription);
                    return Ok(());
                };
                let message = candles::decode(payload)?;
                write(&self.candles).apply(symbol, timeframe, message);
            }
            ChannelKind::Book => {
                let message = order_book::decode(payload)?;
                write(&self.books).apply(symbol, message);
            }
        }
        self.generation.send_modify(|generation| *generation += 1);
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use types::channel::BookPrecision;
    use types::numeric::Price;

    fn make_state() -> MarketState {
        MarketState::new(&FeedConfig::default())
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSD")
    }

    #[test]
    fn test_stale_reads_are_empty() {
        let state = make_state();
        assert!(state.ticker(&btc()).is_none());
        assert_eq!(state.ladder(&btc()).rows.len(), 25);
        assert!(state.ladder(&btc()).is_empty());
        assert_eq!(state.depth_curve(&btc()), DepthCurve::default());
        assert!(state.candles(&btc(), Timeframe::M1).is_empty());
        assert!(state.trades(&btc()).is_empty());
    }

    #[test]
    fn test_apply_routes_by_kind() {
        let state = make_state();

        state
            .apply(
                &Subscription::ticker(btc()),
                &json!([1, 1, 2, 1, 0, 0, 1.5, 10, 2, 1]),
            )
            .unwrap();
        state
            .apply(
                &Subscription::book(btc(), BookPrecision::P0),
                &json!([[100, 1], [101, -2]]),
            )
            .unwrap();
        state
            .apply(&Subscription::trades(btc()), &json!([[1, 1000, 0.1, 100]]))
            .unwrap();
        state
            .apply(
                &Subscription::candles(btc(), Timeframe::M1),
                &json!([[60000, 1, 2, 3, 0.5, 10]]),
            )
            .unwrap();

        assert_eq!(state.ticker(&btc()).unwrap().last_price, Decimal::new(15, 1));
        assert_eq!(
            state.ladder(&btc()).best_ask().map(|l| l.price),
            Some(Price::from_u64(101))
        );
        assert_eq!(state.trades(&btc()).len(), 1);
        assert_eq!(state.candles(&btc(), Timeframe::M1).len(), 1);
        assert_eq!(state.generation(), 4);
    }

    #[test]
    fn test_ticker_with_closes() {
        let state = make_state();
        let eth = Symbol::new("ETHUSD");
        assert!(state.ticker_with_closes(&btc(), Timeframe::M1).is_none());

        state
            .apply(
                &Subscription::ticker(btc()),
                &json!([1, 1, 2, 1, 0, 0, 1.5, 10, 2, 1]),
            )
            .unwrap();
        let row = state.ticker_with_closes(&btc(), Timeframe::M1).unwrap();
        assert_eq!(row.symbol, btc());
        assert!(row.closes.is_empty());

        // Snapshot arrives newest first
        state
            .apply(
                &Subscription::candles(btc(), Timeframe::M1),
                &json!([[120000, 1, 7, 8, 0.5, 10], [60000, 1, 5, 6, 0.5, 10]]),
            )
            .unwrap();
        state
            .apply(
                &Subscription::candles(btc(), Timeframe::H1),
                &json!([[3600000, 1, 9, 9, 0.5, 10]]),
            )
            .unwrap();

        let row = state.ticker_with_closes(&btc(), Timeframe::M1).unwrap();
        assert_eq!(row.ticker.last_price, Decimal::new(15, 1));
        assert_eq!(row.closes, vec![Decimal::from(5), Decimal::from(7)]);

        let rows = state.tickers_with_closes(&[eth, btc()], Timeframe::M1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, btc());
    }

    #[test]
    fn test_failed_decode_writes_nothing() {
        let state = make_state();
        let result = state.apply(&Subscription::ticker(btc()), &json!([1, 2, 3]));

        assert!(result.is_err());
        assert!(state.ticker(&btc()).is_none());
        assert_eq!(state.generation(), 0);
    }

    #[test]
    fn test_change_notification() {
        let state = make_state();
        let mut changes = state.subscribe_changes();
        assert!(!changes.has_changed().unwrap());

        state
            .apply(&Subscription::book(btc(), BookPrecision::P0), &json!([100, 1]))
            .unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), 1);
    }
}
