//! Frame Decoding Engine
//!
//! Extracts signal values from raw CAN frames based on the definitions held in
//! the signal catalog. Handles bit extraction, endianness, multiplexing and
//! physical value conversion. Decoding is a pure function of catalog and frame.

use crate::signals::database::{MessageDefinition, SignalDefinition, ValueType};
use crate::signals::layout::sign_extend;
use crate::signals::SignalCatalog;
use crate::types::{
    BridgeError, DecodeOutcome, DecodedSignal, DecodedSignals, RawFrame, Result, SignalValue,
    UnknownFrameRecord,
};

/// Frame decoder - turns raw frames into decoded signal sets
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode a raw frame against the catalog
    ///
    /// # Returns
    /// * `DecodeOutcome::Decoded` if the identifier is cataloged and the payload is complete
    /// * `DecodeOutcome::Unknown` if the identifier has no catalog entry
    /// * `DecodeOutcome::DecodeError` if the payload is too short for the message
    pub fn decode(catalog: &SignalCatalog, frame: &RawFrame) -> DecodeOutcome {
        let Some(message_def) = catalog.lookup_by_id(frame.can_id) else {
            return DecodeOutcome::Unknown(UnknownFrameRecord {
                can_id: frame.can_id,
                data: frame.data.clone(),
                is_extended: frame.is_extended,
            });
        };

        match Self::decode_message(&frame.data, message_def) {
            Ok(decoded) => DecodeOutcome::Decoded(decoded),
            Err(BridgeError::DecodeError { can_id, reason }) => {
                DecodeOutcome::DecodeError { can_id, reason }
            }
            Err(other) => DecodeOutcome::DecodeError {
                can_id: frame.can_id,
                reason: other.to_string(),
            },
        }
    }

    /// Decode a payload with a known message definition
    ///
    /// The payload must cover every signal's bit range; no partial decode is
    /// attempted on a truncated payload.
    pub fn decode_message(data: &[u8], message_def: &MessageDefinition) -> Result<DecodedSignals> {
        let required = message_def.required_len();
        if data.len() < required {
            return Err(BridgeError::DecodeError {
                can_id: message_def.id,
                reason: format!(
                    "truncated payload: {} bytes, '{}' requires {}",
                    data.len(),
                    message_def.name,
                    required
                ),
            });
        }

        // For multiplexed messages, first extract the multiplexer signal value
        let multiplexer_value = message_def
            .multiplexer()
            .map(|mux_signal| Self::extract_raw(data, mux_signal) as u64);

        let signals = message_def
            .signals
            .iter()
            .filter(|signal| signal.is_active(multiplexer_value))
            .map(|signal| Self::decode_signal(data, signal))
            .collect();

        Ok(DecodedSignals {
            can_id: message_def.id,
            message_name: message_def.name.clone(),
            signals,
            multiplexer_value,
        })
    }

    /// Decode a single signal from frame data
    fn decode_signal(data: &[u8], signal: &SignalDefinition) -> DecodedSignal {
        let raw_value = Self::extract_raw(data, signal);

        let value = match (signal.is_integer_valued(), i64::try_from(raw_value)) {
            (true, Ok(raw)) => SignalValue::Integer(raw),
            (true, Err(_)) => match u64::try_from(raw_value) {
                Ok(raw) => SignalValue::Unsigned(raw),
                Err(_) => SignalValue::Float(raw_value as f64),
            },
            (false, _) => SignalValue::Float(signal.offset + signal.factor * (raw_value as f64)),
        };

        let value_description = signal
            .value_table
            .as_ref()
            .zip(i64::try_from(raw_value).ok())
            .and_then(|(table, raw)| table.get(&raw))
            .cloned();

        DecodedSignal {
            name: signal.name.clone(),
            value,
            unit: signal.unit.clone(),
            value_description,
            raw_value,
        }
    }

    /// Extract the raw value of a signal, sign-extended for signed signals
    fn extract_raw(data: &[u8], signal: &SignalDefinition) -> i128 {
        let raw = signal.layout().extract(data);
        match signal.value_type {
            ValueType::Unsigned => i128::from(raw),
            ValueType::Signed => i128::from(sign_extend(raw, signal.length)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_encoder::MessageEncoder;
    use crate::signals::{ByteOrder, SignalDefinition};

    fn catalog() -> SignalCatalog {
        let engine = MessageDefinition::new(0x100, "EngineStatus", 8)
            .with_signal(
                SignalDefinition::new("RPM", 0, 16)
                    .with_scaling(0.25, 0.0)
                    .with_unit("rpm"),
            )
            .with_signal(SignalDefinition::new("Gear", 16, 4).with_value_label(3, "Drive"))
            .with_signal(
                SignalDefinition::new("Torque", 24, 16)
                    .signed()
                    .with_scaling(0.5, 0.0),
            )
            .with_signal(
                SignalDefinition::new("Pressure", 47, 16).with_byte_order(ByteOrder::BigEndian),
            );

        let muxed = MessageDefinition::new(0x200, "Diag", 4)
            .with_multiplexer("Mode")
            .with_signal(SignalDefinition::new("Mode", 0, 8))
            .with_signal(SignalDefinition::new("SignalA", 8, 16).multiplexed_by("Mode", vec![0]))
            .with_signal(
                SignalDefinition::new("SignalB", 8, 16)
                    .with_scaling(0.1, 0.0)
                    .multiplexed_by("Mode", vec![1]),
            );

        let odometer = MessageDefinition::new(0x300, "Odometer", 8)
            .with_signal(SignalDefinition::new("Ticks", 0, 64));

        let meter = MessageDefinition::new(0x301, "Meter", 8)
            .with_signal(SignalDefinition::new("Energy", 0, 64).with_scaling(0.5, 0.0));

        SignalCatalog::new(vec![engine, muxed, odometer, meter]).unwrap()
    }

    #[test]
    fn test_decode_engine_status() {
        let catalog = catalog();
        let frame = RawFrame::new(0x100, vec![0x10, 0x27, 0x03, 0x9C, 0xFF, 0x01, 0x02, 0]);

        let DecodeOutcome::Decoded(decoded) = FrameDecoder::decode(&catalog, &frame) else {
            panic!("expected decoded outcome");
        };

        assert_eq!(decoded.message_name, "EngineStatus");
        assert_eq!(decoded.get("RPM").unwrap().value, SignalValue::Float(2500.0));
        assert_eq!(decoded.get("RPM").unwrap().unit.as_deref(), Some("rpm"));

        let gear = decoded.get("Gear").unwrap();
        assert_eq!(gear.value, SignalValue::Integer(3));
        assert_eq!(gear.value_description.as_deref(), Some("Drive"));

        // 0xFF9C = -100 raw, scaled by 0.5
        assert_eq!(decoded.get("Torque").unwrap().value, SignalValue::Float(-50.0));

        // Motorola 16-bit with MSB at bit 7 of byte 5
        assert_eq!(decoded.get("Pressure").unwrap().value, SignalValue::Integer(0x0102));
    }

    #[test]
    fn test_unknown_identifier() {
        let catalog = catalog();
        let frame = RawFrame::new(0x999, vec![1, 2, 3]);

        match FrameDecoder::decode(&catalog, &frame) {
            DecodeOutcome::Unknown(record) => {
                assert_eq!(record.can_id, 0x999);
                assert_eq!(record.data, vec![1, 2, 3]);
            }
            other => panic!("expected unknown outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload_is_decode_error() {
        let catalog = catalog();
        let frame = RawFrame::new(0x100, vec![0x10, 0x27]);

        match FrameDecoder::decode(&catalog, &frame) {
            DecodeOutcome::DecodeError { can_id, reason } => {
                assert_eq!(can_id, 0x100);
                assert!(reason.contains("truncated"));
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_multiplexed_decode_selects_active_signals() {
        let catalog = catalog();

        let frame = RawFrame::new(0x200, vec![0x01, 0x10, 0x00, 0x00]);
        let DecodeOutcome::Decoded(decoded) = FrameDecoder::decode(&catalog, &frame) else {
            panic!("expected decoded outcome");
        };

        assert_eq!(decoded.multiplexer_value, Some(1));
        assert!(decoded.get("SignalA").is_none());
        let b = decoded.get("SignalB").unwrap().value.as_f64();
        assert!((b - 1.6).abs() < 1e-9);

        let frame = RawFrame::new(0x200, vec![0x00, 0x10, 0x00, 0x00]);
        let DecodeOutcome::Decoded(decoded) = FrameDecoder::decode(&catalog, &frame) else {
            panic!("expected decoded outcome");
        };
        assert_eq!(decoded.get("SignalA").unwrap().value, SignalValue::Integer(16));
        assert!(decoded.get("SignalB").is_none());
    }

    #[test]
    fn test_longer_payload_is_accepted() {
        let catalog = catalog();
        let frame = RawFrame::new(0x200, vec![0x00, 0x01, 0x00, 0x00, 0xAA, 0xBB]);
        assert!(matches!(
            FrameDecoder::decode(&catalog, &frame),
            DecodeOutcome::Decoded(_)
        ));
    }

    #[test]
    fn test_full_width_unsigned_stays_positive() {
        let catalog = catalog();
        let message = catalog.lookup_by_name("Odometer").unwrap();
        let data = vec![0xFF; 8];

        let decoded = FrameDecoder::decode_message(&data, message).unwrap();
        let ticks = decoded.get("Ticks").unwrap();
        assert_eq!(ticks.value, SignalValue::Unsigned(u64::MAX));
        assert_eq!(ticks.raw_value, i128::from(u64::MAX));

        let encoded = MessageEncoder::encode_message(message, &decoded.to_values()).unwrap();
        assert_eq!(encoded.data, data);

        let small = FrameDecoder::decode_message(&[7, 0, 0, 0, 0, 0, 0, 0], message).unwrap();
        assert_eq!(small.get("Ticks").unwrap().value, SignalValue::Integer(7));
    }

    #[test]
    fn test_full_width_unsigned_scaled() {
        let catalog = catalog();
        let message = catalog.lookup_by_name("Meter").unwrap();
        let data = vec![0, 0, 0, 0, 0, 0, 0, 0x80];

        let decoded = FrameDecoder::decode_message(&data, message).unwrap();
        let energy = decoded.get("Energy").unwrap();
        assert_eq!(energy.value, SignalValue::Float(2f64.powi(62)));
        assert!(energy.value.as_f64() > 0.0);

        let encoded = MessageEncoder::encode_message(message, &decoded.to_values()).unwrap();
        assert_eq!(encoded.data, data);
    }
}
