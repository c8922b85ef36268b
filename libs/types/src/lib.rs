//! Types library for the market feed client
//!
//! Shared definitions used by the streaming client and its consumers.
//!
//! # Modules
//! - `ids`: Identifiers (Symbol, ChannelId, TradeId)
//! - `numeric`: Decimal price type, side classification, wire number parsing
//! - `channel`: Channel kinds, candle timeframes, book precisions
//! - `errors`: Error taxonomy

pub mod channel;
pub mod errors;
pub mod ids;
pub mod numeric;
