//! Message Encoding Engine
//!
//! Packs physical signal values into a raw CAN frame using the catalog's
//! definitions. Encoding is all-or-nothing: every required signal is validated
//! and packed into a scratch payload, and a frame is only returned once all of
//! them succeeded.

use crate::signals::database::{MessageDefinition, SignalDefinition};
use crate::signals::SignalCatalog;
use crate::types::{BridgeError, MessageRef, RawFrame, Result, SignalValue, SignalValues, CAN_MAX_DLEN};

/// Message encoder - turns signal values into raw frames
pub struct MessageEncoder;

impl MessageEncoder {
    /// Look up a message by name or identifier and encode it
    pub fn encode(
        catalog: &SignalCatalog,
        message: &MessageRef,
        values: &SignalValues,
    ) -> Result<RawFrame> {
        let message_def = catalog
            .lookup(message)
            .ok_or_else(|| BridgeError::UnknownMessage(message.clone()))?;

        Self::encode_message(message_def, values)
    }

    /// Encode values with a known message definition
    ///
    /// The returned payload is exactly `message_def.size` bytes long with all
    /// unused bits zero.
    pub fn encode_message(message_def: &MessageDefinition, values: &SignalValues) -> Result<RawFrame> {
        let mut data = vec![0u8; message_def.size];

        // The multiplexer value decides which multiplexed signals are required
        let multiplexer_value = match message_def.multiplexer() {
            Some(mux_signal) => {
                let raw = Self::raw_for(message_def, mux_signal, values)?;
                Some(raw as u64)
            }
            None => None,
        };

        for signal in &message_def.signals {
            if !signal.is_active(multiplexer_value) {
                if values.contains_key(&signal.name) {
                    log::debug!(
                        "Ignoring '{}.{}': not selected by multiplexer value {:?}",
                        message_def.name,
                        signal.name,
                        multiplexer_value
                    );
                }
                continue;
            }

            let raw = Self::raw_for(message_def, signal, values)?;
            signal.layout().pack(&mut data, raw as u64);
        }

        for name in values.keys() {
            if message_def.signal(name).is_none() {
                log::debug!("Ignoring unknown signal '{}' for '{}'", name, message_def.name);
            }
        }

        Ok(RawFrame {
            can_id: message_def.id,
            data,
            is_extended: message_def.is_extended,
            is_fd: message_def.size > CAN_MAX_DLEN,
        })
    }

    /// Validate one signal's value and convert it to its raw representation
    fn raw_for(
        message_def: &MessageDefinition,
        signal: &SignalDefinition,
        values: &SignalValues,
    ) -> Result<i128> {
        let value = values.get(&signal.name).ok_or_else(|| BridgeError::MissingSignal {
            message: message_def.name.clone(),
            signal: signal.name.clone(),
        })?;

        Self::check_range(signal, value)?;

        let raw = Self::to_raw(signal, value)?;

        let (low, high) = signal.raw_bounds();
        if raw < low || raw > high {
            return Err(BridgeError::EncodingOverflow {
                signal: signal.name.clone(),
                raw: raw as f64,
                bits: signal.length,
            });
        }

        Ok(raw)
    }

    /// Check the value against the declared physical range
    fn check_range(signal: &SignalDefinition, value: &SignalValue) -> Result<()> {
        let physical = value.as_f64();
        let below = signal.min.is_some_and(|min| physical < min);
        let above = signal.max.is_some_and(|max| physical > max);

        if below || above || physical.is_nan() {
            return Err(BridgeError::ValueOutOfRange {
                signal: signal.name.clone(),
                value: physical,
                min: signal.min.unwrap_or(f64::NEG_INFINITY),
                max: signal.max.unwrap_or(f64::INFINITY),
            });
        }

        Ok(())
    }

    /// raw = round((physical - offset) / factor)
    fn to_raw(signal: &SignalDefinition, value: &SignalValue) -> Result<i128> {
        // Integers skip the float path so 64-bit values stay exact
        if signal.is_integer_valued() {
            match value {
                SignalValue::Integer(v) => return Ok(i128::from(*v)),
                SignalValue::Unsigned(v) => return Ok(i128::from(*v)),
                SignalValue::Float(_) => {}
            }
        }

        let raw = ((value.as_f64() - signal.offset) / signal.factor).round();
        if !raw.is_finite() || raw.abs() >= 2f64.powi(100) {
            return Err(BridgeError::EncodingOverflow {
                signal: signal.name.clone(),
                raw,
                bits: signal.length,
            });
        }

        Ok(raw as i128)
    }
}
