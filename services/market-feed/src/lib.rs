//! Market Feed Client
//!
//! Consumes a multiplexed public market-data WebSocket feed and maintains:
//! - Per-instrument tickers
//! - Public trade histories
//! - OHLCV candle series per timeframe
//! - Order book mirrors with ladder and depth-curve views
//!
//! State is rebuilt from snapshot + delta frames, exposed read-only to
//! consumers, and optionally re-published at a throttled cadence.
//!
//! # Architecture
//!
//! ```text
//!   WebSocket feed
//!        │
//!  ┌─────▼─────┐
//!  │ Transport │  ← reconnects forever, emits Open/Close/Message
//!  └─────┬─────┘
//!        │
//!  ┌─────▼─────┐      ┌──────────────┐
//!  │  Router   │◄────►│ Subscription │  ← chanId → logical stream
//!  └─────┬─────┘      │   Registry   │
//!        │            └──────────────┘
//!   ┌────┴─────┬──────────┬──────────┐
//!   │          │          │          │
//! ┌─▼────┐ ┌───▼───┐ ┌────▼───┐ ┌────▼────┐
//! │Ticker│ │Trades │ │Candles │ │  Book   │  ← decoders + stores
//! └─┬────┘ └───┬───┘ └────┬───┘ └────┬────┘
//!   │          │          │          │
//! ┌─▼──────────▼──────────▼──────────▼──┐
//! │   MarketState  →  throttled views   │
//! └─────────────────────────────────────┘
//! ```

pub mod candles;
pub mod config;
pub mod decode;
pub mod feed;
pub mod metrics;
pub mod order_book;
pub mod router;
pub mod state;
pub mod subscription;
pub mod throttle;
pub mod ticker;
pub mod trades;
pub mod transport;

pub use config::{ConfigError, FeedConfig};
pub use feed::{FeedCommand, FeedHandle, FeedProcessor, MarketFeed};
pub use state::MarketState;
pub use subscription::Subscription;
