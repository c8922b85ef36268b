//! Shared payload decoding helpers
//!
//! A data payload is either a single entry (`[f0, f1, ...]`) or a snapshot
//! (`[[f0, f1, ...], ...]`). Which one it is follows from the shape of the
//! payload alone; the channel decoders only interpret the fields.

use rust_decimal::Decimal;
use serde_json::Value;
use types::channel::ChannelKind;
use types::numeric::decimal_from_json;

/// Payload marking a heartbeat frame.
pub const HEARTBEAT: &str = "hb";

/// Failure to interpret a data payload for a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{kind} payload is not an array: {payload}")]
    NotAnArray { kind: ChannelKind, payload: String },

    #[error("{kind} entry has {actual} fields, expected at least {expected}")]
    MissingFields {
        kind: ChannelKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} field {index} is not numeric: {value}")]
    NotNumeric {
        kind: ChannelKind,
        index: usize,
        value: String,
    },

    #[error("{kind} channel does not deliver snapshots")]
    UnexpectedSnapshot { kind: ChannelKind },
}

/// A data payload split by shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// List of entries; may be empty.
    Snapshot(&'a [Value]),
    /// The fields of a single entry.
    Update(&'a [Value]),
}

/// True when `payload` is the heartbeat marker.
pub fn is_heartbeat(payload: &Value) -> bool {
    payload.as_str() == Some(HEARTBEAT)
}

/// True when `payload` is an array whose first element is itself an array.
/// An empty array counts as an empty snapshot.
pub fn is_snapshot_shape(payload: &Value) -> bool {
    match payload {
        Value::Array(items) => items.first().map_or(true, Value::is_array),
        _ => false,
    }
}

/// Split `payload` into snapshot or update form.
pub fn classify(kind: ChannelKind, payload: &Value) -> Result<Payload<'_>, DecodeError> {
    let items = payload.as_array().ok_or_else(|| DecodeError::NotAnArray {
        kind,
        payload: payload.to_string(),
    })?;

    if is_snapshot_shape(payload) {
        Ok(Payload::Snapshot(items))
    } else {
        Ok(Payload::Update(items))
    }
}

/// Fields of one entry, requiring at least `min_fields` of them.
pub fn entry_fields(
    kind: ChannelKind,
    entry: &Value,
    min_fields: usize,
) -> Result<&[Value], DecodeError> {
    let fields = entry.as_array().ok_or_else(|| DecodeError::NotAnArray {
        kind,
        payload: entry.to_string(),
    })?;
    require_fields(kind, fields, min_fields)?;
    Ok(fields)
}

pub fn require_fields(kind: ChannelKind, fields: &[Value], min_fields: usize) -> Result<(), DecodeError> {
    if fields.len() < min_fields {
        return Err(DecodeError::MissingFields {
            kind,
            expected: min_fields,
            actual: fields.len(),
        });
    }
    Ok(())
}

/// Numeric field at `index` as an exact decimal.
pub fn decimal_at(kind: ChannelKind, fields: &[Value], index: usize) -> Result<Decimal, DecodeError> {
    let value = field(kind, fields, index)?;
    decimal_from_json(value).map_err(|_| DecodeError::NotNumeric {
        kind,
        index,
        value: value.to_string(),
    })
}

/// Integer field at `index` (ids, millisecond timestamps).
pub fn integer_at(kind: ChannelKind, fields: &[Value], index: usize) -> Result<i64, DecodeError> {
    let value = field(kind, fields, index)?;
    value.as_i64().ok_or_else(|| DecodeError::NotNumeric {
        kind,
        index,
        value: value.to_string(),
    })
}

fn field(kind: ChannelKind, fields: &[Value], index: usize) -> Result<&Value, DecodeError> {
    fields.get(index).ok_or(DecodeError::MissingFields {
        kind,
        expected: index + 1,
        actual: fields.len(),
    })
}
