//! Resilient WebSocket transport
//!
//! Owns at most one socket at a time and reconnects forever after a fixed
//! delay. Lifecycle is reported as `TransportEvent`s on a single-consumer
//! channel, in order: every `Open` is eventually followed by exactly one
//! `Close`, and all `Message`s in between belong to that connection.
//!
//! Outbound messages are fire-and-forget. Anything sent while not connected
//! is dropped, and messages queued for a connection that died before they
//! were written are discarded when the next connection opens, since they
//! refer to channel ids of the old session.
//!
//! A socket that delivers nothing for the idle timeout is treated as dead.
//! The feed heartbeats every subscribed channel, so a live session is never
//! silent for long.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::metrics::FeedMetrics;
use crate::subscription::{OutboundMessage, OutboundSink};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lifecycle and data events, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A socket is open; previous channel ids are void.
    Open,
    /// The socket is gone; all subscriptions are stale.
    Close,
    /// One inbound text frame.
    Message(String),
}

/// Errors internal to the reconnect loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection closed by remote")]
    ConnectionClosed,

    #[error("no frames received for {0:?}")]
    IdleTimeout(Duration),

    #[error("event consumer dropped")]
    ConsumerGone,
}

/// WebSocket transport with automatic reconnection.
pub struct Transport {
    endpoint: Url,
    reconnect_delay: Duration,
    idle_timeout: Duration,
    state: Arc<AtomicU8>,
    started: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    metrics: Arc<FeedMetrics>,
}

impl Transport {
    /// Create a transport and the receiver for its events. Nothing connects
    /// until `connect` is called.
    pub fn new(
        endpoint: Url,
        reconnect_delay: Duration,
        idle_timeout: Duration,
        metrics: Arc<FeedMetrics>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            endpoint,
            reconnect_delay,
            idle_timeout,
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
            started: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            events_tx,
            metrics,
        });
        (transport, events_rx)
    }

    /// Start the connection loop. Later calls are no-ops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("transport already started");
            return;
        }

        let Some(outbound_rx) = self.outbound_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            warn!("transport outbound queue unavailable");
            return;
        };

        let session = Session {
            endpoint: self.endpoint.clone(),
            reconnect_delay: self.reconnect_delay,
            idle_timeout: self.idle_timeout,
            state: self.state.clone(),
            outbound_rx,
            events_tx: self.events_tx.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(session.run());
    }

    /// Queue `text` for the open socket, or drop it when not connected.
    pub fn send_text(&self, text: String) {
        if self.state() != ConnectionState::Connected {
            debug!(message = %text, "not connected, dropping outbound message");
            self.metrics.record_send_dropped();
            return;
        }
        if self.outbound_tx.send(text).is_err() {
            self.metrics.record_send_dropped();
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl OutboundSink for Transport {
    fn send(&self, message: OutboundMessage) {
        self.send_text(message.to_json());
    }
}

/// State owned by the connection loop task.
struct Session {
    endpoint: Url,
    reconnect_delay: Duration,
    idle_timeout: Duration,
    state: Arc<AtomicU8>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    metrics: Arc<FeedMetrics>,
}

impl Session {
    /// Connect, pump, and reconnect until the event consumer goes away.
    async fn run(mut self) {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            self.set_state(ConnectionState::Connecting);
            info!(endpoint = %self.endpoint, attempt, "connecting");

            let mut opened = false;
            let result = self.connect_and_pump(&mut opened).await;
            self.set_state(ConnectionState::Disconnected);

            if opened {
                self.metrics.record_disconnect();
                if self.events_tx.send(TransportEvent::Close).is_err() {
                    break;
                }
            } else {
                self.metrics.record_connect_failure();
            }

            match result {
                Err(TransportError::ConsumerGone) => break,
                Err(e) => warn!(
                    error = %e,
                    retry_in_ms = self.reconnect_delay.as_millis() as u64,
                    "connection lost, reconnecting"
                ),
                Ok(()) => {}
            }

            tokio::time::sleep(self.reconnect_delay).await;
        }

        info!("event consumer dropped, transport stopped");
    }

    async fn connect_and_pump(&mut self, opened: &mut bool) -> Result<(), TransportError> {
        let (ws_stream, response) = connect_async(self.endpoint.as_str()).await?;
        debug!(status = ?response.status(), "websocket handshake complete");

        // Anything queued so far was addressed to a previous session.
        let mut stale = 0u64;
        while self.outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded outbound messages from previous session");
        }

        self.set_state(ConnectionState::Connected);
        self.metrics.record_connect();
        *opened = true;
        info!(endpoint = %self.endpoint, "connected");

        self.events_tx
            .send(TransportEvent::Open)
            .map_err(|_| TransportError::ConsumerGone)?;

        let (mut write, mut read) = ws_stream.split();
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                msg = read.next() => {
                    if matches!(msg, Some(Ok(_))) {
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.events_tx
                                .send(TransportEvent::Message(text))
                                .map_err(|_| TransportError::ConsumerGone)?;
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite queued the pong; push it out now
                            write.flush().await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "received close frame");
                            return Err(TransportError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Binary, pong and raw frames carry nothing for us
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(TransportError::ConnectionClosed),
                    }
                }
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(text) => {
                        write.send(Message::Text(text)).await?;
                        self.metrics.record_sent();
                    }
                    // The transport handle was dropped
                    None => return Err(TransportError::ConsumerGone),
                },
                _ = &mut idle => {
                    warn!(idle_ms = self.idle_timeout.as_millis() as u64, "connection silent, dropping it");
                    return Err(TransportError::IdleTimeout(self.idle_timeout));
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_transport() -> (Arc<Transport>, mpsc::UnboundedReceiver<TransportEvent>, Arc<FeedMetrics>) {
        let metrics = Arc::new(FeedMetrics::new());
        let url = Url::parse("ws://127.0.0.1:1").unwrap();
        let (transport, events) = Transport::new(
            url,
            Duration::from_millis(10),
            Duration::from_secs(30),
            metrics.clone(),
        );
        (transport, events, metrics)
    }

    #[test]
    fn test_initial_state() {
        let (transport, _events, _metrics) = make_transport();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let (transport, _events, metrics) = make_transport();
        transport.send(OutboundMessage::unsubscribe(types::ids::ChannelId::new(1)));
        assert_eq!(metrics.export()["messages_dropped"], 1);
        assert_eq!(metrics.export()["messages_sent"], 0);
    }

    #[test]
    fn test_state_decoding() {
        assert_eq!(ConnectionState::from_u8(0), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from_u8(1), ConnectionState::Connecting);
        assert_eq!(ConnectionState::from_u8(2), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_u8(9), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (transport, _events, metrics) = make_transport();
        transport.connect();
        transport.connect();

        // Port 1 refuses; the loop keeps retrying without ever opening
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_ne!(transport.state(), ConnectionState::Connected);
        assert!(metrics.export()["connect_failures"] >= 1);
        assert_eq!(metrics.export()["connects"], 0);
    }
}
