//! Core types for the CAN/MQTT bridge library
//!
//! This module defines the values that flow through the bridge: raw CAN frames
//! coming from (or going to) the bus, decoded signal sets, MQTT envelopes and the
//! result variants produced by the decoder. None of these carry state from one
//! bridged message to the next.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Maximum payload length of a classic CAN frame
pub const CAN_MAX_DLEN: usize = 8;

/// Maximum payload length of a CAN-FD frame
pub const CANFD_MAX_DLEN: usize = 64;

/// Mask for a 29-bit extended CAN identifier
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Raw CAN frame as seen on the bus
///
/// Produced by the bus transport and consumed by the frame decoder, or produced
/// by the message encoder and handed to the bus transport for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// True if this is a CAN-FD frame
    pub is_fd: bool,
}

impl RawFrame {
    /// Create a classic, standard-ID frame
    pub fn new(can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            can_id,
            is_extended: can_id > 0x7FF,
            is_fd: data.len() > CAN_MAX_DLEN,
            data,
        }
    }

    /// Builder method: mark the identifier as extended (29-bit)
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.is_extended = extended;
        self
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Signal value types produced by the decoder and accepted by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Integer value (unscaled signals)
    Integer(i64),
    /// Unscaled unsigned value above `i64::MAX`
    Unsigned(u64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Unsigned(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Unsigned(v) => *v as f64,
            SignalValue::Float(v) => *v,
        }
    }

    /// Convert signal value to i64 if it carries no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Unsigned(v) => i64::try_from(*v).ok(),
            SignalValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            SignalValue::Float(_) => None,
        }
    }
}

impl From<i64> for SignalValue {
    fn from(value: i64) -> Self {
        SignalValue::Integer(value)
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        SignalValue::Float(value)
    }
}

/// Signal name to physical value mapping, as handed to the encoder
pub type SignalValues = BTreeMap<String, SignalValue>;

/// A decoded signal with its current value
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    /// Signal name from the DBC
    pub name: String,
    /// Physical value (raw * factor + offset)
    pub value: SignalValue,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Value description from value tables (e.g., "Off", "On")
    pub value_description: Option<String>,
    /// Raw value before scaling, wide enough for 64-bit signals of either sign
    pub raw_value: i128,
}

/// All signals decoded from one frame, tagged with the originating message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignals {
    /// CAN message ID
    pub can_id: u32,
    /// Message name from the DBC
    pub message_name: String,
    /// Decoded signals in definition order
    pub signals: Vec<DecodedSignal>,
    /// Active multiplexer value (if the message is multiplexed)
    pub multiplexer_value: Option<u64>,
}

impl DecodedSignals {
    /// Look up a decoded signal by name
    pub fn get(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Physical values keyed by signal name, suitable for re-encoding
    pub fn to_values(&self) -> SignalValues {
        self.signals
            .iter()
            .map(|s| (s.name.clone(), s.value))
            .collect()
    }
}

/// Topic + payload pair exchanged with the MQTT transport
///
/// QoS and retain are carried through untouched; the core never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttEnvelope {
    /// MQTT topic
    pub topic: String,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Quality of service (0, 1 or 2)
    pub qos: u8,
    /// Retain flag
    pub retain: bool,
}

impl MqttEnvelope {
    /// Create an envelope with QoS 0 and no retain flag
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: 0,
            retain: false,
        }
    }

    /// Builder method: set QoS and retain metadata
    pub fn with_delivery(mut self, qos: u8, retain: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self
    }
}

/// A frame whose identifier has no entry in the signal catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrameRecord {
    /// CAN message ID
    pub can_id: u32,
    /// Raw data bytes
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

/// Result of running one frame through the decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// The frame matched a catalog entry and every active signal was decoded
    Decoded(DecodedSignals),
    /// No catalog entry for this identifier
    Unknown(UnknownFrameRecord),
    /// Catalog entry found but the payload could not be decoded
    DecodeError {
        /// CAN message ID
        can_id: u32,
        /// Why decoding was refused
        reason: String,
    },
}

/// Identity of a cataloged message, by symbolic name or numeric identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageRef {
    /// Symbolic message name
    Name(String),
    /// Numeric CAN identifier
    Id(u32),
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRef::Name(name) => write!(f, "{}", name),
            MessageRef::Id(id) => write!(f, "0x{:X}", id),
        }
    }
}

/// Errors that can occur while building the catalog or bridging a message
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Unknown message: {0}")]
    UnknownMessage(MessageRef),

    #[error("Decode error for CAN ID 0x{can_id:X}: {reason}")]
    DecodeError { can_id: u32, reason: String },

    #[error("Missing signal '{signal}' for message '{message}'")]
    MissingSignal { message: String, signal: String },

    #[error("Value {value} for signal '{signal}' outside [{min}, {max}]")]
    ValueOutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Raw value {raw} for signal '{signal}' does not fit in {bits} bits")]
    EncodingOverflow { signal: String, raw: f64, bits: u16 },

    #[error("Unrecognized topic: {0}")]
    UnrecognizedTopic(String),

    #[error("Catalog conflict: {0}")]
    CatalogConflict(String),

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse DBC file: {0}")]
    DbcParseError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BridgeError {
    /// True for errors that must stop the bridge rather than drop one message
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::CatalogConflict(_)
                | BridgeError::InvalidSignalDefinition(_)
                | BridgeError::InvalidConfig(_)
                | BridgeError::DbcParseError(_)
                | BridgeError::Transport(_)
                | BridgeError::IoError(_)
        )
    }
}
