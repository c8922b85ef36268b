use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sysinfo::{Pid, System};
use tracing_subscriber::EnvFilter;

use market_feed::config::{FeedConfig, DEFAULT_ENDPOINT};
use market_feed::{MarketFeed, Subscription};
use types::channel::{BookPrecision, Timeframe};
use types::ids::Symbol;

/// Stream public market data and log a throttled top-of-book view.
#[derive(Parser, Debug)]
#[command(name = "market-feed", version)]
struct Args {
    /// WebSocket endpoint
    #[arg(long, env = "MARKET_FEED_URL", default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// Instruments to follow; the first one is selected for trades and book
    #[arg(
        long,
        env = "MARKET_FEED_SYMBOLS",
        value_delimiter = ',',
        default_value = "BTCUSD,ETHUSD"
    )]
    symbols: Vec<String>,

    /// Candle timeframe
    #[arg(long, env = "MARKET_FEED_TIMEFRAME", default_value = "1m")]
    timeframe: String,

    /// Book precision (P0-P4)
    #[arg(long, env = "MARKET_FEED_PRECISION", default_value = "P0")]
    precision: String,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long, env = "MARKET_FEED_RECONNECT_MS", default_value_t = 5_000)]
    reconnect_ms: u64,

    /// Seconds of silence before the socket is dropped and reopened
    #[arg(long, env = "MARKET_FEED_IDLE_SECS", default_value_t = 60)]
    idle_secs: u64,

    /// Rows in the ladder view
    #[arg(long, env = "MARKET_FEED_LADDER_DEPTH", default_value_t = 25)]
    ladder_depth: usize,

    /// Minimum interval between top-of-book log lines, in milliseconds
    #[arg(long, env = "MARKET_FEED_THROTTLE_MS", default_value_t = 100)]
    throttle_ms: u64,

    /// Trades retained per instrument
    #[arg(long, env = "MARKET_FEED_MAX_TRADES", default_value_t = 250)]
    max_trades: usize,

    /// Candles retained per instrument and timeframe
    #[arg(long, env = "MARKET_FEED_MAX_CANDLES", default_value_t = 1_000)]
    max_candles: usize,

    /// Seconds between health reports
    #[arg(long, env = "MARKET_FEED_HEALTH_SECS", default_value_t = 5)]
    health_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = FeedConfig {
        endpoint: args.url.clone(),
        reconnect_delay: Duration::from_millis(args.reconnect_ms),
        idle_timeout: Duration::from_secs(args.idle_secs),
        ladder_depth: args.ladder_depth,
        throttle_interval: Duration::from_millis(args.throttle_ms),
        max_trades: args.max_trades,
        max_candles: args.max_candles,
        book_precision: BookPrecision::from_wire(&args.precision)?,
    };
    config.validate()?;

    let symbols = args
        .symbols
        .iter()
        .map(|s| Symbol::try_new(s.trim()).with_context(|| format!("invalid symbol {:?}", s)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let selected = symbols.first().cloned().context("no symbols configured")?;
    let timeframe = Timeframe::from_wire(&args.timeframe)?;

    tracing::info!(
        endpoint = %config.endpoint,
        symbols = symbols.len(),
        %selected,
        %timeframe,
        "starting market feed"
    );

    let (feed, handle) = MarketFeed::new(&config)?;
    tokio::spawn(feed.run());

    for symbol in &symbols {
        handle.subscribe(Subscription::ticker(symbol.clone()));
        handle.subscribe(Subscription::candles(symbol.clone(), timeframe));
    }
    handle.select_instrument(selected.clone());

    let ladder_symbol = selected.clone();
    let mut top_of_book = handle.throttled(move |state| state.ladder(&ladder_symbol));

    let health_period = Duration::from_secs(args.health_secs.max(1));
    let mut health_tick = tokio::time::interval(health_period);
    let mut system = System::new();
    let pid = sysinfo::get_current_pid().ok();
    let mut last_frames = handle.metrics().frames_received.load(Ordering::Relaxed);

    loop {
        tokio::select! {
            changed = top_of_book.changed() => {
                if changed.is_err() {
                    break;
                }
                let ladder = top_of_book.borrow_and_update().clone();
                tracing::info!(
                    symbol = %selected,
                    bid = ?ladder.best_bid().map(|l| l.price),
                    bid_size = ?ladder.best_bid().map(|l| l.size()),
                    ask = ?ladder.best_ask().map(|l| l.price),
                    ask_size = ?ladder.best_ask().map(|l| l.size()),
                    "top of book"
                );
            }
            _ = health_tick.tick() => {
                let frames = handle.metrics().frames_received.load(Ordering::Relaxed);
                let frame_rate = frames.saturating_sub(last_frames) as f64 / health_period.as_secs_f64();
                last_frames = frames;

                let memory_mb = sample_memory_mb(&mut system, pid);
                let health = handle.health(frame_rate, memory_mb);
                tracing::info!(
                    ?health,
                    state = ?handle.connection_state(),
                    frame_rate,
                    memory_mb,
                    "feed health"
                );
                tracing::debug!(metrics = ?handle.metrics().export(), "feed counters");
                for row in handle.state().tickers_with_closes(&symbols, timeframe) {
                    tracing::debug!(
                        symbol = %row.symbol,
                        last = %row.ticker.last_price,
                        closes = row.closes.len(),
                        first_close = ?row.closes.first(),
                        last_close = ?row.closes.last(),
                        "ticker overview"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Resident memory of this process in megabytes; zero if unavailable.
fn sample_memory_mb(system: &mut System, pid: Option<Pid>) -> f64 {
    let Some(pid) = pid else {
        return 0.0;
    };
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| process.memory() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}
