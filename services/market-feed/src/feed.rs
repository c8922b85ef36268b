//! Feed processor and consumer handle
//!
//! Pipeline:
//! ```text
//! Transport ──TransportEvent──► FeedProcessor ──► MarketState ──► consumers
//!                                  │   ▲                              │
//!                      subscribe   │   │ FeedCommand                  │
//!                      requests    ▼   └──────── FeedHandle ◄─────────┘
//!                             Transport (OutboundSink)
//! ```
//!
//! One task owns the processor and handles transport events and consumer
//! commands strictly in arrival order. Because the subscription registry is
//! owned by that task, acks and the clear-on-disconnect can never interleave.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use types::channel::BookPrecision;
use types::ids::Symbol;

use crate::config::{ConfigError, FeedConfig};
use crate::metrics::{
    classify_health, ConnectionHealth, FeedMetrics, HealthSample, HealthThresholds, LatencyMonitor,
};
use crate::router::{route, ControlEvent, RouteOutcome};
use crate::state::MarketState;
use crate::subscription::{OutboundSink, Subscription, SubscriptionRegistry};
use crate::throttle::spawn_throttled;
use crate::transport::{ConnectionState, Transport, TransportEvent};

/// Requests from consumers to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    /// Follow trades and book for this instrument, releasing the previous one.
    SelectInstrument(Symbol),
}

/// Consumes transport events and consumer commands; sole writer of
/// `MarketState` and sole owner of the subscription registry.
pub struct FeedProcessor {
    registry: SubscriptionRegistry,
    /// Subscriptions to (re)issue on every open connection.
    desired: BTreeSet<Subscription>,
    selected: Option<Symbol>,
    book_precision: BookPrecision,
    connected: bool,
    state: Arc<MarketState>,
    latency: Arc<LatencyMonitor>,
    metrics: Arc<FeedMetrics>,
}

impl FeedProcessor {
    pub fn new(
        sink: Arc<dyn OutboundSink>,
        state: Arc<MarketState>,
        latency: Arc<LatencyMonitor>,
        metrics: Arc<FeedMetrics>,
        book_precision: BookPrecision,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(sink),
            desired: BTreeSet::new(),
            selected: None,
            book_precision,
            connected: false,
            state,
            latency,
            metrics,
        }
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close => self.on_close(),
            TransportEvent::Message(text) => {
                self.on_message(&text);
            }
        }
    }

    pub fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Subscribe(subscription) => self.subscribe(subscription),
            FeedCommand::Unsubscribe(subscription) => self.unsubscribe(&subscription),
            FeedCommand::SelectInstrument(symbol) => self.select_instrument(symbol),
        }
    }

    /// Route one frame, apply it, and time the decode.
    pub fn on_message(&mut self, text: &str) -> RouteOutcome {
        self.metrics.record_frame_received();
        let outcome = route(&mut self.registry, text);

        match &outcome {
            RouteOutcome::Control(event) => {
                self.metrics.record_control_frame();
                if let ControlEvent::Subscribed { bound: false, channel_id, subscription } = event {
                    debug!(%channel_id, %subscription, "ack for a subscription no longer pending");
                }
            }
            RouteOutcome::Heartbeat(_) => self.metrics.record_heartbeat(),
            RouteOutcome::Unresolved(_) => self.metrics.record_unresolved(),
            RouteOutcome::Ignored(_) => self.metrics.record_ignored(),
            RouteOutcome::Malformed(reason) => {
                debug!(reason = %reason, "discarding malformed frame");
                self.metrics.record_malformed();
            }
            RouteOutcome::Dispatch { subscription, payload } => {
                let start = Instant::now();
                match self.state.apply(subscription, payload) {
                    Ok(()) => {
                        self.latency.record_latency(subscription.kind(), start.elapsed());
                        self.metrics.record_dispatched();
                    }
                    Err(e) => {
                        debug!(%subscription, error = %e, "discarding undecodable payload");
                        self.metrics.record_decode_error();
                    }
                }
            }
        }

        outcome
    }

    fn on_open(&mut self) {
        self.connected = true;
        self.registry.clear();
        info!(subscriptions = self.desired.len(), "connection open, resubscribing");
        for subscription in &self.desired {
            self.registry.subscribe(subscription.clone());
        }
    }

    fn on_close(&mut self) {
        self.connected = false;
        self.registry.clear();
        warn!("connection closed, subscriptions invalidated");
    }

    fn subscribe(&mut self, subscription: Subscription) {
        self.desired.insert(subscription.clone());
        if self.connected {
            self.registry.subscribe(subscription);
        }
    }

    fn unsubscribe(&mut self, subscription: &Subscription) {
        self.desired.remove(subscription);
        if self.connected {
            self.registry.unsubscribe(subscription);
        }
    }

    fn select_instrument(&mut self, symbol: Symbol) {
        if self.selected.as_ref() == Some(&symbol) {
            return;
        }

        if let Some(previous) = self.selected.take() {
            self.unsubscribe(&Subscription::trades(previous.clone()));
            self.unsubscribe(&Subscription::book(previous, self.book_precision));
        }

        info!(%symbol, "selecting instrument");
        self.subscribe(Subscription::trades(symbol.clone()));
        self.subscribe(Subscription::book(symbol.clone(), self.book_precision));
        self.selected = Some(symbol);
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn selected(&self) -> Option<&Symbol> {
        self.selected.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Subscriptions reissued on every open connection.
    pub fn desired(&self) -> impl Iterator<Item = &Subscription> {
        self.desired.iter()
    }
}

/// The feed task: a transport plus the processor that consumes it.
pub struct MarketFeed {
    transport: Arc<Transport>,
    processor: FeedProcessor,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
}

impl MarketFeed {
    /// Build the feed and its consumer handle. Nothing connects until `run`.
    pub fn new(config: &FeedConfig) -> Result<(Self, FeedHandle), ConfigError> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;

        let metrics = Arc::new(FeedMetrics::new());
        let latency = Arc::new(LatencyMonitor::new());
        let state = Arc::new(MarketState::new(config));

        let (transport, events) = Transport::new(
            endpoint,
            config.reconnect_delay,
            config.idle_timeout,
            metrics.clone(),
        );
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let processor = FeedProcessor::new(
            transport.clone(),
            state.clone(),
            latency.clone(),
            metrics.clone(),
            config.book_precision,
        );

        let handle = FeedHandle {
            commands: commands_tx,
            state,
            latency,
            metrics,
            transport: transport.clone(),
            throttle_interval: config.throttle_interval,
            thresholds: HealthThresholds::default(),
        };

        Ok((
            Self {
                transport,
                processor,
                events,
                commands,
            },
            handle,
        ))
    }

    /// Connect and process until the transport stops.
    pub async fn run(mut self) {
        self.transport.connect();
        let mut commands_open = true;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.processor.handle_event(event),
                    None => break,
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.processor.handle_command(command),
                    None => commands_open = false,
                },
            }
        }

        info!("market feed stopped");
    }
}

/// Cloneable consumer handle: read state, issue commands, observe health.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: Arc<MarketState>,
    latency: Arc<LatencyMonitor>,
    metrics: Arc<FeedMetrics>,
    transport: Arc<Transport>,
    throttle_interval: Duration,
    thresholds: HealthThresholds,
}

impl FeedHandle {
    pub fn subscribe(&self, subscription: Subscription) {
        self.send(FeedCommand::Subscribe(subscription));
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.send(FeedCommand::Unsubscribe(subscription));
    }

    pub fn select_instrument(&self, symbol: Symbol) {
        self.send(FeedCommand::SelectInstrument(symbol));
    }

    pub fn state(&self) -> &Arc<MarketState> {
        &self.state
    }

    pub fn latency(&self) -> &Arc<LatencyMonitor> {
        &self.latency
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Throttled view of `reader` at the configured interval.
    pub fn throttled<T, F>(&self, reader: F) -> watch::Receiver<T>
    where
        T: Send + Sync + 'static,
        F: FnMut(&MarketState) -> T + Send + 'static,
    {
        self.throttled_every(self.throttle_interval, reader)
    }

    /// Throttled view of `reader`, emitting at most once per `interval`.
    pub fn throttled_every<T, F>(&self, interval: Duration, mut reader: F) -> watch::Receiver<T>
    where
        T: Send + Sync + 'static,
        F: FnMut(&MarketState) -> T + Send + 'static,
    {
        let state = self.state.clone();
        spawn_throttled(state.subscribe_changes(), interval, move || reader(state.as_ref()))
    }

    /// Advisory health from the latency samples, a frame-rate and a memory
    /// sample, and the current connection state.
    pub fn health(&self, frame_rate: f64, memory_mb: f64) -> ConnectionHealth {
        let sample = HealthSample {
            frame_rate,
            memory_mb,
            connected: self.transport.is_connected(),
        };
        classify_health(&self.latency.snapshot(), &sample, &self.thresholds)
    }

    fn send(&self, command: FeedCommand) {
        if self.commands.send(command).is_err() {
            warn!("market feed not running, command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::OutboundMessage;
    use std::sync::Mutex;
    use types::ids::ChannelId;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<OutboundMessage> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl OutboundSink for RecordingSink {
        fn send(&self, message: OutboundMessage) {
            self.sent.lock().unwrap().push(message);
        }
    }

    fn make_processor() -> (FeedProcessor, Arc<RecordingSink>, Arc<FeedMetrics>) {
        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(FeedMetrics::new());
        let processor = FeedProcessor::new(
            sink.clone(),
            Arc::new(MarketState::new(&FeedConfig::default())),
            Arc::new(LatencyMonitor::new()),
            metrics.clone(),
            BookPrecision::P0,
        );
        (processor, sink, metrics)
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSD")
    }

    #[test]
    fn test_subscribe_before_open_is_deferred() {
        let (mut processor, sink, _metrics) = make_processor();
        processor.handle_command(FeedCommand::Subscribe(Subscription::ticker(btc())));
        assert!(sink.take().is_empty());

        processor.handle_event(TransportEvent::Open);
        assert_eq!(sink.take(), vec![Subscription::ticker(btc()).request()]);
        assert!(processor.registry().is_pending(&Subscription::ticker(btc())));
    }

    #[test]
    fn test_reopen_resubscribes_everything() {
        let (mut processor, sink, _metrics) = make_processor();
        processor.handle_event(TransportEvent::Open);
        processor.handle_command(FeedCommand::Subscribe(Subscription::ticker(btc())));
        processor.on_message(r#"{"event":"subscribed","channel":"ticker","chanId":5,"symbol":"tBTCUSD"}"#);
        sink.take();

        processor.handle_event(TransportEvent::Close);
        assert_eq!(processor.registry().active_count(), 0);
        assert!(sink.take().is_empty());

        processor.handle_event(TransportEvent::Open);
        assert_eq!(sink.take(), vec![Subscription::ticker(btc()).request()]);
    }

    #[test]
    fn test_select_instrument_swaps_streams() {
        let (mut processor, sink, _metrics) = make_processor();
        let eth = Symbol::new("ETHUSD");
        processor.handle_event(TransportEvent::Open);

        processor.handle_command(FeedCommand::SelectInstrument(btc()));
        processor.on_message(r#"{"event":"subscribed","channel":"trades","chanId":3,"symbol":"tBTCUSD"}"#);
        processor.on_message(r#"{"event":"subscribed","channel":"book","chanId":4,"symbol":"tBTCUSD","prec":"P0"}"#);
        sink.take();

        processor.handle_command(FeedCommand::SelectInstrument(eth.clone()));
        let sent = sink.take();
        assert_eq!(
            sent,
            vec![
                OutboundMessage::unsubscribe(ChannelId::new(3)),
                OutboundMessage::unsubscribe(ChannelId::new(4)),
                Subscription::trades(eth.clone()).request(),
                Subscription::book(eth.clone(), BookPrecision::P0).request(),
            ]
        );
        assert_eq!(processor.selected(), Some(&eth));
        assert_eq!(processor.desired().count(), 2);
    }

    #[test]
    fn test_reselecting_same_instrument_is_noop() {
        let (mut processor, sink, _metrics) = make_processor();
        processor.handle_event(TransportEvent::Open);
        processor.handle_command(FeedCommand::SelectInstrument(btc()));
        sink.take();

        processor.handle_command(FeedCommand::SelectInstrument(btc()));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_decode_error_counted_and_discarded() {
        let (mut processor, _sink, metrics) = make_processor();
        processor.handle_event(TransportEvent::Open);
        processor.handle_command(FeedCommand::Subscribe(Subscription::ticker(btc())));
        processor.on_message(r#"{"event":"subscribed","channel":"ticker","chanId":5,"symbol":"tBTCUSD"}"#);

        processor.on_message("[5,[1,2,3]]");

        let exported = metrics.export();
        assert_eq!(exported["decode_errors"], 1);
        assert_eq!(exported["data_frames_dispatched"], 0);
        assert_eq!(exported["frames_received"], 2);
    }

    #[test]
    fn test_latency_recorded_on_apply() {
        let (mut processor, _sink, _metrics) = make_processor();
        let latency = processor.latency.clone();
        processor.handle_event(TransportEvent::Open);
        processor.handle_command(FeedCommand::Subscribe(Subscription::book(btc(), BookPrecision::P0)));
        processor.on_message(r#"{"event":"subscribed","channel":"book","chanId":7,"symbol":"tBTCUSD","prec":"P0"}"#);

        assert!(latency.latest(types::channel::ChannelKind::Book).is_none());
        processor.on_message("[7,[[100,1,5]]]");
        assert!(latency.latest(types::channel::ChannelKind::Book).is_some());
    }

    #[tokio::test]
    async fn test_handle_health_when_disconnected() {
        let config = FeedConfig::new("ws://127.0.0.1:1").unwrap();
        let (_feed, handle) = MarketFeed::new(&config).unwrap();

        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
        assert_eq!(handle.health(60.0, 10.0), ConnectionHealth::Poor);
    }
}
