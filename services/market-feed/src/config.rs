//! Feed client configuration
//!
//! Defaults match the public endpoint and the consumer expectations of the
//! ladder view. Every field can be overridden from the command line or the
//! environment by the binary; the library only validates.

use std::time::Duration;

use types::channel::BookPrecision;
use url::Url;

/// Public market data endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://api-pub.bitfinex.com/ws/2";

/// Rows in the ladder view.
pub const DEFAULT_LADDER_DEPTH: usize = 25;

/// Errors raised while validating configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("unsupported endpoint scheme {0}: expected ws or wss")]
    UnsupportedScheme(String),

    #[error("ladder depth must be at least 1")]
    ZeroLadderDepth,

    #[error("throttle interval must be non-zero")]
    ZeroThrottleInterval,

    #[error("idle timeout must be non-zero")]
    ZeroIdleTimeout,

    #[error("{name} history cap must be at least 1")]
    ZeroHistory { name: &'static str },
}

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Fixed delay between reconnect attempts (default: 5s).
    pub reconnect_delay: Duration,
    /// Silence after which an open socket is considered dead (default: 60s).
    pub idle_timeout: Duration,
    /// Rows returned by the ladder view (default: 25).
    pub ladder_depth: usize,
    /// Minimum interval between throttled consumer emissions (default: 100ms).
    pub throttle_interval: Duration,
    /// Trades retained per instrument (default: 250).
    pub max_trades: usize,
    /// Candles retained per instrument and timeframe (default: 1000).
    pub max_candles: usize,
    /// Precision requested for book channels (default: P0).
    pub book_precision: BookPrecision,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            ladder_depth: DEFAULT_LADDER_DEPTH,
            throttle_interval: Duration::from_millis(100),
            max_trades: 250,
            max_candles: 1_000,
            book_precision: BookPrecision::P0,
        }
    }
}

impl FeedConfig {
    /// Default configuration pointed at `endpoint`, validated.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: endpoint.into(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field; returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        if self.ladder_depth == 0 {
            return Err(ConfigError::ZeroLadderDepth);
        }
        if self.throttle_interval.is_zero() {
            return Err(ConfigError::ZeroThrottleInterval);
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.max_trades == 0 {
            return Err(ConfigError::ZeroHistory { name: "trade" });
        }
        if self.max_candles == 0 {
            return Err(ConfigError::ZeroHistory { name: "candle" });
        }
        Ok(())
    }

    /// Parsed endpoint. Only `ws` and `wss` are accepted.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FeedConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ladder_depth, 25);
        assert_eq!(config.throttle_interval, Duration::from_millis(100));
        assert_eq!(config.endpoint_url().unwrap().scheme(), "wss");
    }

    #[test]
    fn test_new_with_local_endpoint() {
        let config = FeedConfig::new("ws://127.0.0.1:9001").unwrap();
        assert_eq!(config.endpoint_url().unwrap().port(), Some(9001));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = FeedConfig::new("not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_http_scheme_rejected() {
        let err = FeedConfig::new("https://api-pub.bitfinex.com/ws/2").unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedScheme("https".to_string()));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = FeedConfig {
            ladder_depth: 0,
            ..FeedConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroLadderDepth));

        let config = FeedConfig {
            throttle_interval: Duration::ZERO,
            ..FeedConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroThrottleInterval));

        let config = FeedConfig {
            idle_timeout: Duration::ZERO,
            ..FeedConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroIdleTimeout));

        let config = FeedConfig {
            max_trades: 0,
            ..FeedConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroHistory { name: "trade" })
        );
    }
}
