//! Signal catalog
//!
//! Holds every message and signal definition of the loaded DBC model and answers
//! lookups by CAN identifier and by message name. The catalog is validated once
//! at construction and never mutated afterwards, so it can be shared between the
//! two bridge pipelines behind an `Arc` without locking.

use crate::signals::layout::SignalLayout;
use crate::types::{BridgeError, MessageRef, Result, CANFD_MAX_DLEN};
use std::collections::{HashMap, HashSet};

/// A complete CAN message definition
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    /// CAN message ID (without the extended-frame flag bit)
    pub id: u32,
    /// True if the ID is a 29-bit extended identifier
    pub is_extended: bool,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message
    pub signals: Vec<SignalDefinition>,
    /// Multiplexer signal name (if multiplexed)
    pub multiplexer_signal: Option<String>,
    /// Bytes needed to cover every signal, kept in step with `signals`
    pub(crate) required_len: usize,
}

/// A CAN signal definition
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame (DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value, if declared
    pub min: Option<f64>,
    /// Maximum physical value, if declared
    pub max: Option<f64>,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Value table for enum-like values (raw_value -> description)
    pub value_table: Option<HashMap<i64, String>>,
    /// Multiplexer info (None if not multiplexed)
    pub multiplexer_info: Option<MultiplexerInfo>,
    /// Bit spans derived from start bit, length and byte order
    pub(crate) layout: SignalLayout,
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// Multiplexer information for multiplexed signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexerInfo {
    /// Name of the multiplexer signal that controls this signal
    pub multiplexer_signal: String,
    /// Multiplexer value(s) for which this signal is active
    pub multiplexer_values: Vec<u64>,
}

impl SignalDefinition {
    /// Create an unsigned little-endian signal with unit scaling and no range
    pub fn new(name: impl Into<String>, start_bit: u16, length: u16) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: None,
            max: None,
            unit: None,
            value_table: None,
            multiplexer_info: None,
            layout: SignalLayout::new(start_bit, length, ByteOrder::LittleEndian),
        }
    }

    /// Builder method: set byte order
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self.layout = SignalLayout::for_signal(&self);
        self
    }

    /// Builder method: mark the signal as signed
    pub fn signed(mut self) -> Self {
        self.value_type = ValueType::Signed;
        self
    }

    /// Builder method: set factor and offset
    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Builder method: set the physical range
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Builder method: set the engineering unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Builder method: add a value table entry
    pub fn with_value_label(mut self, raw: i64, label: impl Into<String>) -> Self {
        self.value_table
            .get_or_insert_with(HashMap::new)
            .insert(raw, label.into());
        self
    }

    /// Builder method: make the signal active only for the given multiplexer values
    pub fn multiplexed_by(mut self, multiplexer: impl Into<String>, values: Vec<u64>) -> Self {
        self.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: multiplexer.into(),
            multiplexer_values: values,
        });
        self
    }

    /// Bit layout of this signal within the payload
    pub fn layout(&self) -> &SignalLayout {
        &self.layout
    }

    /// True for unscaled signals, which are surfaced as integers
    pub fn is_integer_valued(&self) -> bool {
        self.factor == 1.0 && self.offset == 0.0
    }

    /// Inclusive raw value bounds for the declared bit width
    pub fn raw_bounds(&self) -> (i128, i128) {
        let bits = self.length as u32;
        match self.value_type {
            ValueType::Unsigned => (0, (1i128 << bits) - 1),
            ValueType::Signed => (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1),
        }
    }

    /// Resolve a value-table label to its raw value
    pub fn raw_for_label(&self, label: &str) -> Option<i64> {
        self.value_table.as_ref().and_then(|table| {
            table
                .iter()
                .find(|(_, description)| description.as_str() == label)
                .map(|(raw, _)| *raw)
        })
    }

    /// True if the signal is active for the given multiplexer value
    pub fn is_active(&self, multiplexer_value: Option<u64>) -> bool {
        match (&self.multiplexer_info, multiplexer_value) {
            (None, _) => true,
            (Some(info), Some(value)) => info.multiplexer_values.contains(&value),
            (Some(_), None) => false,
        }
    }
}

impl MessageDefinition {
    /// Create a standard-ID message with no signals
    pub fn new(id: u32, name: impl Into<String>, size: usize) -> Self {
        Self {
            id,
            is_extended: false,
            name: name.into(),
            size,
            sender: None,
            signals: Vec::new(),
            multiplexer_signal: None,
            required_len: 0,
        }
    }

    /// Builder method: append a signal
    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.required_len = self.required_len.max(signal.layout.required_bytes());
        self.signals.push(signal);
        self
    }

    /// Builder method: declare the multiplexer signal
    pub fn with_multiplexer(mut self, name: impl Into<String>) -> Self {
        self.multiplexer_signal = Some(name.into());
        self
    }

    /// Builder method: mark the identifier as extended
    pub fn extended(mut self) -> Self {
        self.is_extended = true;
        self
    }

    /// Find a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// True if this message has multiplexed signals
    pub fn is_multiplexed(&self) -> bool {
        self.multiplexer_signal.is_some()
    }

    /// The multiplexer signal, if any
    pub fn multiplexer(&self) -> Option<&SignalDefinition> {
        self.multiplexer_signal
            .as_deref()
            .and_then(|name| self.signal(name))
    }

    /// Minimum payload length that covers every signal's bit range
    pub fn required_len(&self) -> usize {
        self.required_len
    }

    /// Rebuild signal layouts and the required length from the public fields
    pub(crate) fn refresh_layouts(&mut self) {
        for signal in &mut self.signals {
            signal.layout = SignalLayout::for_signal(signal);
        }
        self.required_len = self
            .signals
            .iter()
            .map(|s| s.layout.required_bytes())
            .max()
            .unwrap_or(0);
    }

    /// Identity of this message under the given naming convention
    pub fn identity(&self, by_id: bool) -> MessageRef {
        if by_id {
            MessageRef::Id(self.id)
        } else {
            MessageRef::Name(self.name.clone())
        }
    }

    /// Check the structural invariants of the definition
    fn validate(&self) -> Result<()> {
        if self.size > CANFD_MAX_DLEN {
            return Err(BridgeError::InvalidSignalDefinition(format!(
                "message '{}' declares {} bytes (max {})",
                self.name, self.size, CANFD_MAX_DLEN
            )));
        }

        let mut seen = HashSet::new();
        for signal in &self.signals {
            if !seen.insert(signal.name.as_str()) {
                return Err(BridgeError::CatalogConflict(format!(
                    "duplicate signal '{}' in message '{}'",
                    signal.name, self.name
                )));
            }

            if signal.length == 0 || signal.length > 64 {
                return Err(BridgeError::InvalidSignalDefinition(format!(
                    "signal '{}.{}' has length {} (expected 1-64)",
                    self.name, signal.name, signal.length
                )));
            }

            if signal.factor == 0.0 || !signal.factor.is_finite() || !signal.offset.is_finite() {
                return Err(BridgeError::InvalidSignalDefinition(format!(
                    "signal '{}.{}' has invalid scaling ({}, {})",
                    self.name, signal.name, signal.factor, signal.offset
                )));
            }

            let required = signal.layout().required_bytes();
            if required > self.size {
                return Err(BridgeError::InvalidSignalDefinition(format!(
                    "signal '{}.{}' needs {} bytes but message is {} bytes",
                    self.name, signal.name, required, self.size
                )));
            }

            if let Some(ref mux) = signal.multiplexer_info {
                if self.multiplexer_signal.as_deref() != Some(mux.multiplexer_signal.as_str()) {
                    return Err(BridgeError::InvalidSignalDefinition(format!(
                        "signal '{}.{}' is multiplexed by unknown signal '{}'",
                        self.name, signal.name, mux.multiplexer_signal
                    )));
                }
            }
        }

        if let Some(ref mux) = self.multiplexer_signal {
            if self.signal(mux).is_none() {
                return Err(BridgeError::InvalidSignalDefinition(format!(
                    "message '{}' names missing multiplexer '{}'",
                    self.name, mux
                )));
            }
        }

        Ok(())
    }
}

/// The read-only signal catalog
#[derive(Debug, Clone)]
pub struct SignalCatalog {
    /// All message definitions in load order
    messages: Vec<MessageDefinition>,

    /// Key: CAN ID, Value: index into `messages`
    by_id: HashMap<u32, usize>,

    /// Key: message name, Value: index into `messages`
    by_name: HashMap<String, usize>,
}

impl SignalCatalog {
    /// Build the catalog, rejecting duplicate identifiers or names and any
    /// definition that violates the layout invariants
    pub fn new(messages: impl IntoIterator<Item = MessageDefinition>) -> Result<Self> {
        let mut catalog = Self {
            messages: Vec::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };

        for mut message in messages {
            message.refresh_layouts();
            message.validate()?;

            if let Some(&existing) = catalog.by_id.get(&message.id) {
                return Err(BridgeError::CatalogConflict(format!(
                    "CAN ID 0x{:X} defined by both '{}' and '{}'",
                    message.id, catalog.messages[existing].name, message.name
                )));
            }

            if catalog.by_name.contains_key(&message.name) {
                return Err(BridgeError::CatalogConflict(format!(
                    "message name '{}' defined twice",
                    message.name
                )));
            }

            let idx = catalog.messages.len();
            catalog.by_id.insert(message.id, idx);
            catalog.by_name.insert(message.name.clone(), idx);
            catalog.messages.push(message);
        }

        log::debug!(
            "Signal catalog built: {} messages, {} signals",
            catalog.messages.len(),
            catalog.stats().num_signals
        );

        Ok(catalog)
    }

    /// Get a message definition by CAN ID
    pub fn lookup_by_id(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.by_id.get(&can_id).map(|&idx| &self.messages[idx])
    }

    /// Get a message definition by name
    pub fn lookup_by_name(&self, name: &str) -> Option<&MessageDefinition> {
        self.by_name.get(name).map(|&idx| &self.messages[idx])
    }

    /// Get a message definition by either identity
    pub fn lookup(&self, message: &MessageRef) -> Option<&MessageDefinition> {
        match message {
            MessageRef::Name(name) => self.lookup_by_name(name),
            MessageRef::Id(id) => self.lookup_by_id(*id),
        }
    }

    /// Iterate over all message definitions in load order
    pub fn messages(&self) -> impl Iterator<Item = &MessageDefinition> {
        self.messages.iter()
    }

    /// Get catalog statistics
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
            num_multiplexed: self.messages.iter().filter(|m| m.is_multiplexed()).count(),
        }
    }

    /// Get all CAN IDs in the catalog, sorted
    pub fn get_all_can_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Number of multiplexed messages
    pub num_multiplexed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_data() -> MessageDefinition {
        MessageDefinition::new(0x123, "EngineData", 8)
            .with_signal(
                SignalDefinition::new("EngineSpeed", 0, 16)
                    .with_range(0.0, 8000.0)
                    .with_unit("rpm"),
            )
            .with_signal(SignalDefinition::new("EngineTemp", 16, 8).with_scaling(1.0, -40.0))
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = SignalCatalog::new(Vec::new()).unwrap();
        let stats = catalog.stats();
        assert_eq!(stats.num_messages, 0);
        assert_eq!(stats.num_signals, 0);
        assert!(catalog.lookup_by_id(0x123).is_none());
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let catalog = SignalCatalog::new(vec![engine_data()]).unwrap();

        let stats = catalog.stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 2);

        let msg = catalog.lookup_by_id(0x123).unwrap();
        assert_eq!(msg.name, "EngineData");
        assert_eq!(msg.signals[0].name, "EngineSpeed");

        let by_name = catalog.lookup_by_name("EngineData").unwrap();
        assert_eq!(by_name.id, 0x123);
        assert!(catalog.lookup(&MessageRef::Id(0x124)).is_none());
        assert_eq!(catalog.get_all_can_ids(), vec![0x123]);
    }

    #[test]
    fn test_duplicate_id_is_conflict() {
        let other = MessageDefinition::new(0x123, "Other", 8);
        let err = SignalCatalog::new(vec![engine_data(), other]).unwrap_err();
        assert!(matches!(err, BridgeError::CatalogConflict(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_duplicate_name_is_conflict() {
        let other = MessageDefinition::new(0x200, "EngineData", 8);
        let err = SignalCatalog::new(vec![engine_data(), other]).unwrap_err();
        assert!(matches!(err, BridgeError::CatalogConflict(_)));
    }

    #[test]
    fn test_duplicate_signal_name_is_conflict() {
        let msg = MessageDefinition::new(0x200, "Dup", 8)
            .with_signal(SignalDefinition::new("A", 0, 8))
            .with_signal(SignalDefinition::new("A", 8, 8));
        let err = SignalCatalog::new(vec![msg]).unwrap_err();
        assert!(matches!(err, BridgeError::CatalogConflict(_)));
    }

    #[test]
    fn test_signal_outside_message_is_rejected() {
        let msg = MessageDefinition::new(0x200, "Short", 2)
            .with_signal(SignalDefinition::new("Wide", 8, 16));
        let err = SignalCatalog::new(vec![msg]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSignalDefinition(_)));
    }

    #[test]
    fn test_zero_factor_is_rejected() {
        let msg = MessageDefinition::new(0x200, "Flat", 8)
            .with_signal(SignalDefinition::new("Zero", 0, 8).with_scaling(0.0, 0.0));
        let err = SignalCatalog::new(vec![msg]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSignalDefinition(_)));
    }

    #[test]
    fn test_required_len_and_bounds() {
        let msg = engine_data();
        assert_eq!(msg.required_len(), 3);

        let unsigned = SignalDefinition::new("U", 0, 12);
        assert_eq!(unsigned.raw_bounds(), (0, 4095));

        let signed = SignalDefinition::new("S", 0, 8).signed();
        assert_eq!(signed.raw_bounds(), (-128, 127));
    }

    #[test]
    fn test_catalog_holds_layouts_for_edited_fields() {
        let mut msg = engine_data();
        msg.signals[1].start_bit = 40;
        msg.signals[1].byte_order = ByteOrder::BigEndian;

        let catalog = SignalCatalog::new(vec![msg]).unwrap();
        let msg = catalog.lookup_by_id(0x123).unwrap();

        let temp = &msg.signals[1];
        assert_eq!(
            temp.layout(),
            &SignalLayout::new(40, 8, ByteOrder::BigEndian)
        );
        assert_eq!(msg.required_len(), 6);
    }

    #[test]
    fn test_builders_keep_layout_current() {
        let signal = SignalDefinition::new("Pressure", 47, 16).with_byte_order(ByteOrder::BigEndian);
        assert_eq!(signal.layout().required_bytes(), 7);

        let msg = MessageDefinition::new(0x300, "Brake", 8).with_signal(signal);
        assert_eq!(msg.required_len(), 7);
    }

    #[test]
    fn test_value_labels_and_mux_activity() {
        let signal = SignalDefinition::new("Gear", 8, 4)
            .with_value_label(0, "Park")
            .with_value_label(1, "Drive")
            .multiplexed_by("Mode", vec![1, 2]);

        assert_eq!(signal.raw_for_label("Drive"), Some(1));
        assert_eq!(signal.raw_for_label("Neutral"), None);
        assert!(signal.is_active(Some(2)));
        assert!(!signal.is_active(Some(0)));
        assert!(!signal.is_active(None));
    }
}
