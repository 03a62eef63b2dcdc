//! Bit layout of a signal within a frame payload
//!
//! A layout is a list of spans, each covering a contiguous run of bits inside one
//! payload byte. The same layout drives both extraction (decode) and packing
//! (encode), so the two are inverses by construction.

use crate::signals::database::{ByteOrder, SignalDefinition};

/// One contiguous run of bits within a single payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSpan {
    /// Payload byte holding these bits
    pub byte_index: usize,
    /// Lowest bit position within the byte (0..=7)
    pub bit_offset: u8,
    /// Number of consecutive bits in this span (1..=8)
    pub num_bits: u8,
    /// Position of the span's lowest bit in the raw value
    pub value_shift: u8,
}

/// Precomputed mapping from a signal's DBC bit position to payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalLayout {
    pub spans: Vec<BitSpan>,
    pub length: u16,
}

impl SignalLayout {
    /// Build the layout for a signal definition.
    ///
    /// Little-endian (Intel): the start bit is the LSB and bits walk upward,
    /// continuing at bit 0 of the next byte.
    ///
    /// Big-endian (Motorola): the start bit is the MSB in DBC sawtooth
    /// numbering; bits walk downward and continue at bit 7 of the next byte.
    pub fn for_signal(signal: &SignalDefinition) -> Self {
        Self::new(signal.start_bit, signal.length, signal.byte_order)
    }

    /// Build a layout from raw start bit, length and byte order
    pub fn new(start_bit: u16, length: u16, byte_order: ByteOrder) -> Self {
        let mut spans = Vec::new();
        let mut byte_index = (start_bit / 8) as usize;
        let mut bit_index = (start_bit % 8) as u8;
        let mut remaining = length as u32;

        match byte_order {
            ByteOrder::BigEndian => {
                while remaining > 0 {
                    let num_bits = std::cmp::min(bit_index as u32 + 1, remaining) as u8;
                    let bit_offset = bit_index + 1 - num_bits;
                    remaining -= num_bits as u32;
                    spans.push(BitSpan {
                        byte_index,
                        bit_offset,
                        num_bits,
                        value_shift: remaining as u8,
                    });
                    byte_index += 1;
                    bit_index = 7;
                }
            }
            ByteOrder::LittleEndian => {
                let mut value_shift: u32 = 0;
                while remaining > 0 {
                    let num_bits = std::cmp::min(8 - bit_index as u32, remaining) as u8;
                    spans.push(BitSpan {
                        byte_index,
                        bit_offset: bit_index,
                        num_bits,
                        value_shift: value_shift as u8,
                    });
                    value_shift += num_bits as u32;
                    remaining -= num_bits as u32;
                    byte_index += 1;
                    bit_index = 0;
                }
            }
        }

        Self { spans, length }
    }

    /// Number of payload bytes needed to hold this signal
    pub fn required_bytes(&self) -> usize {
        self.spans
            .iter()
            .map(|span| span.byte_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Extract the raw unsigned value.
    ///
    /// `data` must hold at least `required_bytes()` bytes.
    pub fn extract(&self, data: &[u8]) -> u64 {
        let mut result: u64 = 0;
        for span in &self.spans {
            let mask = ((1u16 << span.num_bits) - 1) as u8;
            let bits = (data[span.byte_index] >> span.bit_offset) & mask;
            result |= (bits as u64) << span.value_shift;
        }
        result
    }

    /// Pack a raw unsigned value, clearing the target bits first so several
    /// signals can share one payload.
    pub fn pack(&self, data: &mut [u8], raw: u64) {
        for span in &self.spans {
            let mask = ((1u16 << span.num_bits) - 1) as u8;
            let bits = ((raw >> span.value_shift) as u8) & mask;
            data[span.byte_index] &= !(mask << span.bit_offset);
            data[span.byte_index] |= bits << span.bit_offset;
        }
    }
}

/// Sign-extend a value from N bits to 64 bits
pub fn sign_extend(value: u64, bit_length: u16) -> i64 {
    if bit_length >= 64 || bit_length == 0 {
        return value as i64;
    }

    let shift = 64 - bit_length as u32;
    ((value as i64) << shift) >> shift
}
