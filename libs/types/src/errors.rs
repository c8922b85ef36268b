//! Error types for shared feed definitions
//!
//! Parsing failures at the protocol boundary, using thiserror

use thiserror::Error;

/// Failure to interpret a wire value as one of the shared types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Unknown book precision: {0}")]
    UnknownPrecision(String),

    #[error("Invalid candle key: {0}")]
    InvalidCandleKey(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),
}
