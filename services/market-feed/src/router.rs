//! Frame router
//!
//! Classifies every inbound text frame:
//! 1. JSON object with `event` → control message; the registry is updated here.
//! 2. `[chanId, payload]` → resolve the channel id against the registry.
//! 3. Unresolved id or `"hb"` payload → discarded.
//! 4. Otherwise the payload is handed back for dispatch to its decoder.
//!
//! Trade executions also arrive tagged as `[chanId, "te"|"tu", entry]`; the
//! entry is routed as a single update. Other tagged frames are discarded.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};
use types::channel::{parse_candle_key, BookPrecision, ChannelKind};
use types::errors::TypeError;
use types::ids::{ChannelId, Symbol};

use crate::decode::is_heartbeat;
use crate::subscription::{Subscription, SubscriptionRegistry};

/// Tags on trade execution frames that carry a routable entry.
const TRADE_TAGS: [&str; 2] = ["te", "tu"];

/// Control message as sent by the remote. Only the fields the client uses
/// are declared; the rest are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
struct ControlFrame {
    event: String,
    channel: Option<String>,
    #[serde(rename = "chanId")]
    chan_id: Option<u64>,
    symbol: Option<String>,
    key: Option<String>,
    prec: Option<String>,
    version: Option<u64>,
    code: Option<i64>,
    msg: Option<String>,
}

impl ControlFrame {
    /// Logical stream named by the `channel`/`symbol`/`key`/`prec` fields.
    fn subscription(&self) -> Result<Subscription, TypeError> {
        let channel = self.channel.as_deref().unwrap_or_default();
        let kind = ChannelKind::from_wire(channel)?;

        if kind == ChannelKind::Candles {
            let key = self.key.as_deref().unwrap_or_default();
            let (timeframe, symbol) = parse_candle_key(key)?;
            return Ok(Subscription::candles(symbol, timeframe));
        }

        let wire_symbol = self.symbol.as_deref().unwrap_or_default();
        let symbol = Symbol::from_wire(wire_symbol)
            .ok_or_else(|| TypeError::InvalidSymbol(wire_symbol.to_string()))?;

        Ok(match kind {
            ChannelKind::Ticker => Subscription::ticker(symbol),
            ChannelKind::Trades => Subscription::trades(symbol),
            _ => {
                let precision = match self.prec.as_deref() {
                    Some(prec) => BookPrecision::from_wire(prec)?,
                    None => BookPrecision::default(),
                };
                Subscription::book(symbol, precision)
            }
        })
    }
}

/// Control events the router acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Subscription acknowledged. `bound` is false when nothing was pending.
    Subscribed {
        channel_id: ChannelId,
        subscription: Subscription,
        bound: bool,
    },
    Unsubscribed {
        channel_id: ChannelId,
    },
    /// Platform status or version notice.
    Info {
        version: Option<u64>,
        code: Option<i64>,
    },
    Error {
        code: Option<i64>,
        message: String,
    },
    /// Configuration echo; nothing to do.
    Conf,
    /// Any other event name.
    Other(String),
}

/// Outcome of routing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Control(ControlEvent),
    Heartbeat(ChannelId),
    /// Data for a channel id the registry does not know.
    Unresolved(ChannelId),
    /// Tagged frame with no routable payload (e.g. checksum).
    Ignored(ChannelId),
    /// Not a protocol frame.
    Malformed(String),
    /// Payload ready for the decoder of `subscription`.
    Dispatch {
        subscription: Subscription,
        payload: Value,
    },
}

/// Route one inbound text frame.
pub fn route(registry: &mut SubscriptionRegistry, text: &str) -> RouteOutcome {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return RouteOutcome::Malformed(format!("invalid json: {}", e)),
    };

    match frame {
        Value::Object(_) => match serde_json::from_value::<ControlFrame>(frame) {
            Ok(control) => RouteOutcome::Control(handle_control(registry, control)),
            Err(e) => RouteOutcome::Malformed(format!("invalid control message: {}", e)),
        },
        Value::Array(items) => route_data(registry, items),
        other => RouteOutcome::Malformed(format!("unexpected frame: {}", other)),
    }
}

fn route_data(registry: &SubscriptionRegistry, mut items: Vec<Value>) -> RouteOutcome {
    let Some(channel_id) = items.first().and_then(Value::as_u64).map(ChannelId::new) else {
        return RouteOutcome::Malformed("data frame without channel id".to_string());
    };

    let payload = match items.len() {
        2 => items.swap_remove(1),
        3 => {
            let routable = match items[1].as_str() {
                Some(tag) => TRADE_TAGS.contains(&tag),
                None => return RouteOutcome::Malformed("tagged frame without tag".to_string()),
            };
            if !routable {
                return RouteOutcome::Ignored(channel_id);
            }
            items.swap_remove(2)
        }
        n => return RouteOutcome::Malformed(format!("data frame with {} elements", n)),
    };

    let Some(subscription) = registry.resolve(channel_id) else {
        trace!(%channel_id, "discarding frame for unknown channel");
        return RouteOutcome::Unresolved(channel_id);
    };

    if is_heartbeat(&payload) {
        return RouteOutcome::Heartbeat(channel_id);
    }

    RouteOutcome::Dispatch {
        subscription: subscription.clone(),
        payload,
    }
}

fn handle_control(registry: &mut SubscriptionRegistry, control: ControlFrame) -> ControlEvent {
    match control.event.as_str() {
        "subscribed" => {
            let Some(chan_id) = control.chan_id else {
                warn!(channel = ?control.channel, "subscribed event without chanId");
                return ControlEvent::Other(control.event);
            };
            let channel_id = ChannelId::new(chan_id);
            match control.subscription() {
                Ok(subscription) => {
                    let bound = registry.on_ack(channel_id, &subscription);
                    ControlEvent::Subscribed {
                        channel_id,
                        subscription,
                        bound,
                    }
                }
                Err(e) => {
                    warn!(%channel_id, error = %e, "unrecognised subscription ack");
                    ControlEvent::Other(control.event)
                }
            }
        }
        "unsubscribed" => {
            let channel_id = ChannelId::new(control.chan_id.unwrap_or_default());
            if let Some(subscription) = registry.on_unsubscribed(channel_id) {
                debug!(%channel_id, %subscription, "unsubscribe confirmed");
            }
            ControlEvent::Unsubscribed { channel_id }
        }
        "info" => {
            info!(
                version = ?control.version,
                code = ?control.code,
                msg = ?control.msg,
                "feed info"
            );
            ControlEvent::Info {
                version: control.version,
                code: control.code,
            }
        }
        "error" => {
            let message = control.msg.clone().unwrap_or_default();
            warn!(code = ?control.code, msg = %message, "feed error");
            if let Ok(subscription) = control.subscription() {
                if registry.reject(&subscription) {
                    debug!(%subscription, "dropped refused subscription");
                }
            }
            ControlEvent::Error {
                code: control.code,
                message,
            }
        }
        "conf" => ControlEvent::Conf,
        _ => {
            debug!(event = %control.event, "unhandled control event");
            ControlEvent::Other(control.event)
        }
    }
}
