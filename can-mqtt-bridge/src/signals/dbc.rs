//! DBC model adapter
//!
//! Converts a DBC model parsed by the `can-dbc` crate into the catalog's
//! message and signal definitions.

use crate::signals::database::{
    ByteOrder, MessageDefinition, MultiplexerInfo, SignalCatalog, SignalDefinition, ValueType,
};
use crate::signals::layout::SignalLayout;
use crate::types::{BridgeError, Result, CAN_EFF_MASK};
use std::collections::HashMap;
use std::path::Path;

/// Bit 31 of a DBC message ID marks an extended identifier
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

/// Pseudo-message Vector tools use to park unassigned signals
const INDEPENDENT_SIGNALS_MSG: &str = "VECTOR__INDEPENDENT_SIG_MSG";

/// Parse a DBC file and build the signal catalog from it
pub fn load_catalog(path: &Path) -> Result<SignalCatalog> {
    let messages = parse_dbc_file(path)?;
    SignalCatalog::new(messages)
}

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        BridgeError::DbcParseError(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // Try UTF-8 first, then fall back to Latin-1 (Windows-1252 compatible)
    let dbc_content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let dbc = can_dbc::DBC::from_slice(dbc_content.as_bytes()).map_err(|e| {
        BridgeError::DbcParseError(format!("Failed to parse DBC file {:?}: {:?}", path, e))
    })?;

    let messages = messages_from_dbc(&dbc)?;

    log::info!("Parsed {} messages from {:?}", messages.len(), path);

    Ok(messages)
}

/// Convert every message of a parsed DBC model
pub fn messages_from_dbc(dbc: &can_dbc::DBC) -> Result<Vec<MessageDefinition>> {
    dbc.messages()
        .iter()
        .filter(|msg| msg.message_name() != INDEPENDENT_SIGNALS_MSG)
        .map(|msg| convert_message(dbc, msg))
        .collect()
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(dbc: &can_dbc::DBC, dbc_msg: &can_dbc::Message) -> Result<MessageDefinition> {
    let mut multiplexer_signal_name: Option<String> = None;

    // First pass: identify multiplexer signal
    for dbc_sig in dbc_msg.signals() {
        if let can_dbc::MultiplexIndicator::Multiplexor = dbc_sig.multiplexer_indicator() {
            multiplexer_signal_name = Some(dbc_sig.name().to_string());
            break;
        }
    }

    // Second pass: convert all signals
    let mut signals = Vec::new();
    for dbc_sig in dbc_msg.signals() {
        let value_table = dbc
            .value_descriptions_for_signal(*dbc_msg.message_id(), dbc_sig.name())
            .map(|descriptions| {
                descriptions
                    .iter()
                    .map(|d| (*d.a() as i64, d.b().to_string()))
                    .collect::<HashMap<i64, String>>()
            });

        signals.push(convert_signal(
            dbc_sig,
            multiplexer_signal_name.as_deref(),
            value_table,
        )?);
    }

    let raw_id = dbc_msg.message_id().0;
    let is_extended = raw_id & DBC_EXTENDED_FLAG != 0;

    let mut message = MessageDefinition {
        id: if is_extended { raw_id & CAN_EFF_MASK } else { raw_id },
        is_extended,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
        multiplexer_signal: multiplexer_signal_name,
        required_len: 0,
    };
    message.refresh_layouts();

    Ok(message)
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    multiplexer_signal_name: Option<&str>,
    value_table: Option<HashMap<i64, String>>,
) -> Result<SignalDefinition> {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let switch_value = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(value)
        | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(value) => Some(value),
        _ => None,
    };

    let multiplexer_info = match switch_value {
        Some(value) => Some(MultiplexerInfo {
            multiplexer_signal: multiplexer_signal_name
                .ok_or_else(|| {
                    BridgeError::InvalidSignalDefinition(format!(
                        "Multiplexed signal '{}' but no multiplexer found",
                        dbc_sig.name()
                    ))
                })?
                .to_string(),
            multiplexer_values: vec![value],
        }),
        None => None,
    };

    // [0|0] in a DBC means "no range declared"
    let (min, max) = match (*dbc_sig.min(), *dbc_sig.max()) {
        (min, max) if min == 0.0 && max == 0.0 => (None, None),
        (min, max) => (Some(min), Some(max)),
    };

    let start_bit = *dbc_sig.start_bit() as u16;
    let length = *dbc_sig.signal_size() as u16;

    Ok(SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit,
        length,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min,
        max,
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        value_table: value_table.filter(|table| !table.is_empty()),
        multiplexer_info,
        layout: SignalLayout::new(start_bit, length, byte_order),
    })
}
