//! Subscription registry
//!
//! Maps remote channel ids to logical data streams.
//!
//! Flow: subscribe → pending → ack (`subscribed` event) → acknowledged.
//!
//! Before acknowledgement a subscription is keyed by its logical identity
//! (kind, instrument, params); after it by the channel id the remote assigned.
//! Channel ids are only valid for one connection: `clear()` is called on every
//! open and close so no id survives a reconnect.
//!
//! A subscription released while its request is still in flight is kept as
//! released: the remote will ack it anyway, and that ack is answered with an
//! unsubscribe so the stream does not keep flowing for the rest of the session.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};
use types::channel::{candle_key, BookPrecision, ChannelKind, Timeframe};
use types::ids::{ChannelId, Symbol};

/// A logical data stream: channel kind, instrument and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscription {
    Ticker { symbol: Symbol },
    Trades { symbol: Symbol },
    Candles { symbol: Symbol, timeframe: Timeframe },
    Book { symbol: Symbol, precision: BookPrecision },
}

impl Subscription {
    pub fn ticker(symbol: Symbol) -> Self {
        Subscription::Ticker { symbol }
    }

    pub fn trades(symbol: Symbol) -> Self {
        Subscription::Trades { symbol }
    }

    pub fn candles(symbol: Symbol, timeframe: Timeframe) -> Self {
        Subscription::Candles { symbol, timeframe }
    }

    pub fn book(symbol: Symbol, precision: BookPrecision) -> Self {
        Subscription::Book { symbol, precision }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Subscription::Ticker { .. } => ChannelKind::Ticker,
            Subscription::Trades { .. } => ChannelKind::Trades,
            Subscription::Candles { .. } => ChannelKind::Candles,
            Subscription::Book { .. } => ChannelKind::Book,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Subscription::Ticker { symbol }
            | Subscription::Trades { symbol }
            | Subscription::Candles { symbol, .. }
            | Subscription::Book { symbol, .. } => symbol,
        }
    }

    /// Candle timeframe; `None` for other kinds.
    pub fn timeframe(&self) -> Option<Timeframe> {
        match self {
            Subscription::Candles { timeframe, .. } => Some(*timeframe),
            _ => None,
        }
    }

    /// Wire subscribe request for this stream.
    pub fn request(&self) -> OutboundMessage {
        let channel = self.kind().as_wire().to_string();
        match self {
            Subscription::Ticker { symbol } | Subscription::Trades { symbol } => {
                OutboundMessage::Subscribe {
                    channel,
                    symbol: Some(symbol.to_wire()),
                    key: None,
                    prec: None,
                }
            }
            Subscription::Candles { symbol, timeframe } => OutboundMessage::Subscribe {
                channel,
                symbol: None,
                key: Some(candle_key(*timeframe, symbol)),
                prec: None,
            },
            Subscription::Book { symbol, precision } => OutboundMessage::Subscribe {
                channel,
                symbol: Some(symbol.to_wire()),
                key: None,
                prec: Some(precision.as_wire().to_string()),
            },
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::Ticker { symbol } => write!(f, "ticker@{}", symbol),
            Subscription::Trades { symbol } => write!(f, "trades@{}", symbol),
            Subscription::Candles { symbol, timeframe } => {
                write!(f, "candles@{}@{}", symbol, timeframe)
            }
            Subscription::Book { symbol, precision } => write!(f, "book@{}@{}", symbol, precision),
        }
    }
}

/// Client-to-server protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Subscribe {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prec: Option<String>,
    },
    Unsubscribe {
        #[serde(rename = "chanId")]
        chan_id: u64,
    },
}

impl OutboundMessage {
    pub fn unsubscribe(channel_id: ChannelId) -> Self {
        OutboundMessage::Unsubscribe {
            chan_id: channel_id.value(),
        }
    }

    /// JSON text for the socket.
    pub fn to_json(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Destination for outbound protocol messages.
pub trait OutboundSink: Send + Sync {
    /// Fire-and-forget; delivery is not guaranteed.
    fn send(&self, message: OutboundMessage);
}

/// A subscribe request awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubscription {
    pub subscription: Subscription,
    pub requested_at: Instant,
}

/// Result of a subscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Request sent; awaiting ack.
    Requested(PendingSubscription),
    /// Already requested on this connection.
    AlreadyPending,
    /// Already acknowledged on this channel id.
    AlreadyActive(ChannelId),
}

/// Pending and acknowledged subscriptions for the current connection.
pub struct SubscriptionRegistry {
    sink: Arc<dyn OutboundSink>,
    pending: HashMap<Subscription, PendingSubscription>,
    active: HashMap<ChannelId, Subscription>,
    /// Released before ack; the request is still in flight.
    released: HashSet<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            sink,
            pending: HashMap::new(),
            active: HashMap::new(),
            released: HashSet::new(),
        }
    }

    /// Record a pending entry and send the subscribe request.
    pub fn subscribe(&mut self, subscription: Subscription) -> SubscribeOutcome {
        if self.pending.contains_key(&subscription) {
            return SubscribeOutcome::AlreadyPending;
        }
        if let Some(channel_id) = self.channel_for(&subscription) {
            return SubscribeOutcome::AlreadyActive(channel_id);
        }

        // The earlier request is still in flight; wait for its ack.
        let resumed = self.released.remove(&subscription);

        debug!(%subscription, "subscribing");
        let pending = PendingSubscription {
            subscription: subscription.clone(),
            requested_at: Instant::now(),
        };
        self.pending.insert(subscription.clone(), pending.clone());
        if !resumed {
            self.sink.send(subscription.request());
        }
        SubscribeOutcome::Requested(pending)
    }

    /// Promote the matching pending entry, binding `channel_id`.
    /// Returns false when nothing was pending for `subscription`. An ack for
    /// a released subscription is answered with an unsubscribe.
    pub fn on_ack(&mut self, channel_id: ChannelId, subscription: &Subscription) -> bool {
        if self.released.remove(subscription) {
            debug!(%channel_id, %subscription, "ack for released subscription, unsubscribing");
            self.sink.send(OutboundMessage::unsubscribe(channel_id));
            return false;
        }

        let Some(pending) = self.pending.remove(subscription) else {
            debug!(%channel_id, %subscription, "ack without pending subscription, ignoring");
            return false;
        };

        info!(
            %channel_id,
            subscription = %pending.subscription,
            ack_ms = pending.requested_at.elapsed().as_millis() as u64,
            "subscription acknowledged"
        );
        self.active.insert(channel_id, pending.subscription);
        true
    }

    /// Drop a pending entry the remote refused.
    pub fn reject(&mut self, subscription: &Subscription) -> bool {
        let released = self.released.remove(subscription);
        self.pending.remove(subscription).is_some() || released
    }

    /// Subscription bound to `channel_id`, if any.
    pub fn resolve(&self, channel_id: ChannelId) -> Option<&Subscription> {
        self.active.get(&channel_id)
    }

    /// Release a subscription. An acknowledged stream is unsubscribed on the
    /// wire and its channel id stops resolving immediately; a pending one is
    /// marked released and unsubscribed once its ack arrives.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        if let Some(channel_id) = self.channel_for(subscription) {
            self.active.remove(&channel_id);
            self.sink.send(OutboundMessage::unsubscribe(channel_id));
            debug!(%channel_id, %subscription, "unsubscribed");
            return true;
        }
        if self.pending.remove(subscription).is_some() {
            self.released.insert(subscription.clone());
            return true;
        }
        false
    }

    /// Remote confirmation of an unsubscribe; removes any remaining binding.
    pub fn on_unsubscribed(&mut self, channel_id: ChannelId) -> Option<Subscription> {
        self.active.remove(&channel_id)
    }

    /// Forget everything. Called whenever the connection opens or closes.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() || !self.active.is_empty() || !self.released.is_empty() {
            debug!(
                pending = self.pending.len(),
                active = self.active.len(),
                released = self.released.len(),
                "clearing subscription registry"
            );
        }
        self.pending.clear();
        self.active.clear();
        self.released.clear();
    }

    /// Channel id currently bound to `subscription`.
    pub fn channel_for(&self, subscription: &Subscription) -> Option<ChannelId> {
        self.active
            .iter()
            .find(|(_, active)| *active == subscription)
            .map(|(channel_id, _)| *channel_id)
    }

    pub fn is_pending(&self, subscription: &Subscription) -> bool {
        self.pending.contains_key(subscription)
    }

    /// Released before its ack arrived.
    pub fn is_released(&self, subscription: &Subscription) -> bool {
        self.released.contains(subscription)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
