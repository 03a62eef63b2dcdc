//! MQTT payload conventions
//!
//! Serializes decoded signals into the configured payload representation and
//! parses inbound payloads back into signal values or raw frames. Also covers the
//! raw record used for frames with no catalog entry:
//!
//! ```json
//! {"message_id": 2457, "data": "0102aabb"}
//! ```

use crate::config::PayloadFormat;
use crate::signals::{MessageDefinition, SignalDefinition};
use crate::types::{
    BridgeError, DecodedSignals, RawFrame, Result, SignalValue, SignalValues,
    UnknownFrameRecord, CANFD_MAX_DLEN, CAN_MAX_DLEN,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Identifier and hex payload of a frame passed through without decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// CAN identifier (decimal)
    pub message_id: u32,
    /// Payload as lowercase hex
    pub data: String,
}

/// Serialize a decoded frame for publishing
///
/// `data` is the frame payload the signals were decoded from; it is published
/// as-is under the raw-bytes convention.
pub fn encode_signals(
    decoded: &DecodedSignals,
    data: &[u8],
    format: PayloadFormat,
    value_labels: bool,
) -> Result<Vec<u8>> {
    match format {
        PayloadFormat::RawBytes => Ok(data.to_vec()),
        PayloadFormat::JsonObject => {
            let mut object = Map::new();
            for signal in &decoded.signals {
                let value = match (&signal.value_description, value_labels) {
                    (Some(label), true) => Value::String(label.clone()),
                    _ => signal_value_to_json(&signal.name, signal.value)?,
                };
                object.insert(signal.name.clone(), value);
            }
            serde_json::to_vec(&Value::Object(object))
                .map_err(|e| BridgeError::InvalidPayload(e.to_string()))
        }
    }
}

/// Parse a JSON object payload into signal values for the given message
///
/// Numbers are taken as physical values, booleans as 1/0, and strings are
/// resolved through the signal's value table.
pub fn decode_signal_values(payload: &[u8], message: &MessageDefinition) -> Result<SignalValues> {
    let parsed: Value = serde_json::from_slice(payload)
        .map_err(|e| BridgeError::InvalidPayload(format!("JSON parsing error: {}", e)))?;

    let Value::Object(object) = parsed else {
        return Err(BridgeError::InvalidPayload(format!(
            "expected a JSON object for '{}'",
            message.name
        )));
    };

    let mut values = SignalValues::new();
    for (name, value) in object {
        let signal_value = match value {
            Value::Number(n) => number_to_signal_value(&n).ok_or_else(|| {
                BridgeError::InvalidPayload(format!("'{}' is not a representable number", name))
            })?,
            Value::Bool(b) => SignalValue::Integer(b as i64),
            Value::String(label) => match message.signal(&name) {
                Some(signal) => label_to_signal_value(signal, &label)?,
                None => {
                    log::debug!("Ignoring label for unknown signal '{}'", name);
                    continue;
                }
            },
            other => {
                return Err(BridgeError::InvalidPayload(format!(
                    "unsupported value for '{}': {}",
                    name, other
                )))
            }
        };
        values.insert(name, signal_value);
    }

    Ok(values)
}

/// Build a frame from a raw-bytes payload for the given message
pub fn frame_from_bytes(payload: &[u8], message: &MessageDefinition) -> Result<RawFrame> {
    if payload.len() != message.size {
        return Err(BridgeError::InvalidPayload(format!(
            "'{}' expects {} bytes, payload has {}",
            message.name,
            message.size,
            payload.len()
        )));
    }

    Ok(RawFrame {
        can_id: message.id,
        data: payload.to_vec(),
        is_extended: message.is_extended,
        is_fd: payload.len() > CAN_MAX_DLEN,
    })
}

/// Serialize an unknown frame as a raw record
pub fn encode_unknown(record: &UnknownFrameRecord) -> Result<Vec<u8>> {
    let raw = RawRecord {
        message_id: record.can_id,
        data: to_hex(&record.data),
    };
    serde_json::to_vec(&raw).map_err(|e| BridgeError::InvalidPayload(e.to_string()))
}

/// Parse a raw record payload into a frame
pub fn decode_raw_record(payload: &[u8]) -> Result<RawFrame> {
    let record: RawRecord = serde_json::from_slice(payload)
        .map_err(|e| BridgeError::InvalidPayload(format!("invalid raw record: {}", e)))?;

    let data = from_hex(&record.data).ok_or_else(|| {
        BridgeError::InvalidPayload(format!("invalid hex data '{}'", record.data))
    })?;

    if data.len() > CANFD_MAX_DLEN {
        return Err(BridgeError::InvalidPayload(format!(
            "raw record carries {} bytes (max {})",
            data.len(),
            CANFD_MAX_DLEN
        )));
    }

    Ok(RawFrame::new(record.message_id, data))
}

fn signal_value_to_json(name: &str, value: SignalValue) -> Result<Value> {
    match value {
        SignalValue::Integer(v) => Ok(Value::from(v)),
        SignalValue::Unsigned(v) => Ok(Value::from(v)),
        SignalValue::Float(v) => Number::from_f64(v).map(Value::Number).ok_or_else(|| {
            BridgeError::InvalidPayload(format!("'{}' decoded to non-finite value", name))
        }),
    }
}

fn number_to_signal_value(n: &Number) -> Option<SignalValue> {
    if let Some(i) = n.as_i64() {
        Some(SignalValue::Integer(i))
    } else if let Some(u) = n.as_u64() {
        Some(SignalValue::Unsigned(u))
    } else {
        n.as_f64().map(SignalValue::Float)
    }
}

fn label_to_signal_value(signal: &SignalDefinition, label: &str) -> Result<SignalValue> {
    let raw = signal.raw_for_label(label).ok_or_else(|| {
        BridgeError::InvalidPayload(format!(
            "'{}' is not a value label of '{}'",
            label, signal.name
        ))
    })?;

    if signal.is_integer_valued() {
        Ok(SignalValue::Integer(raw))
    } else {
        Ok(SignalValue::Float(signal.offset + signal.factor * raw as f64))
    }
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}
