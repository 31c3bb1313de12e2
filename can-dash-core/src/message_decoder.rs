//! Message Decoding Engine
//!
//! Extracts physical signal values from a raw payload based on a message
//! definition. Handles payload normalization, bit extraction, endianness,
//! multiplexing and scaling.

use crate::signals::database::{ByteOrder, MessageDefinition, SignalDefinition, ValueType};
use crate::types::{DashError, Result};
use std::borrow::Cow;

/// Message decoder - extracts signals from CAN payloads
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode a payload into `(signal name, physical value)` pairs.
    ///
    /// The payload is zero-padded on the right when shorter than the
    /// message's expected length and truncated when longer. Pairs are
    /// returned in signal-definition order; multiplexed signals that are
    /// not selected by the current multiplexer value are left out.
    ///
    /// # Errors
    /// `DecodeError` if any signal's bit layout does not fit the message.
    pub fn decode<'a>(
        message_def: &'a MessageDefinition,
        payload: &[u8],
    ) -> Result<Vec<(&'a str, f64)>> {
        let data = Self::normalize_payload(payload, message_def.size);

        let multiplexer_value = match (message_def.is_multiplexed, &message_def.multiplexer_signal) {
            (true, Some(mux_name)) => {
                let mux_signal = message_def
                    .signals
                    .iter()
                    .find(|s| s.name == *mux_name)
                    .ok_or_else(|| {
                        DashError::DecodeError(format!(
                            "Multiplexer '{}' missing from message '{}'",
                            mux_name, message_def.name
                        ))
                    })?;
                Some(Self::switch_value(&data, mux_signal)?)
            }
            _ => None,
        };

        let mut values = Vec::with_capacity(message_def.signals.len());
        for signal in &message_def.signals {
            if let Some(ref mux_info) = signal.multiplexer_info {
                match multiplexer_value {
                    Some(current) if mux_info.multiplexer_values.contains(&current) => {}
                    _ => continue,
                }
            }

            let raw_value = Self::extract_signal_value(&data, signal)?;
            values.push((signal.name.as_str(), Self::to_physical(raw_value, signal)));
        }

        Ok(values)
    }

    /// Raw bit pattern of the switch signal, the form `mN` values are written in.
    ///
    /// Signed switches are not sign-extended here: a 4-bit signed switch
    /// reading `0xF` selects `m15`.
    fn switch_value(data: &[u8], switch: &SignalDefinition) -> Result<u64> {
        let raw = Self::extract_signal_value(data, switch)? as u64;
        Ok(match switch.length {
            64.. => raw,
            bits => raw & ((1u64 << bits) - 1),
        })
    }

    /// Zero-pad or truncate a payload to the expected length
    pub fn normalize_payload(payload: &[u8], expected_len: usize) -> Cow<'_, [u8]> {
        if payload.len() == expected_len {
            Cow::Borrowed(payload)
        } else if payload.len() > expected_len {
            Cow::Borrowed(&payload[..expected_len])
        } else {
            let mut padded = payload.to_vec();
            padded.resize(expected_len, 0);
            Cow::Owned(padded)
        }
    }

    fn to_physical(raw_value: i64, signal: &SignalDefinition) -> f64 {
        let raw = match signal.value_type {
            // Unsigned values were carried through i64 bit-for-bit
            ValueType::Unsigned => raw_value as u64 as f64,
            ValueType::Signed => raw_value as f64,
        };
        signal.offset + signal.factor * raw
    }

    /// Extract raw signal value from payload data
    fn extract_signal_value(data: &[u8], signal: &SignalDefinition) -> Result<i64> {
        let start_bit = signal.start_bit as usize;
        let length = signal.length as usize;

        if length == 0 || length > 64 {
            return Err(DashError::DecodeError(format!(
                "Signal '{}' has invalid length {}",
                signal.name, length
            )));
        }

        let raw_value = match signal.byte_order {
            ByteOrder::LittleEndian => Self::extract_little_endian(data, start_bit, length),
            ByteOrder::BigEndian => Self::extract_big_endian(data, start_bit, length),
        }
        .ok_or_else(|| {
            DashError::DecodeError(format!(
                "Signal '{}' ({}|{}) exceeds {}-byte payload",
                signal.name,
                start_bit,
                length,
                data.len()
            ))
        })?;

        Ok(match signal.value_type {
            ValueType::Unsigned => raw_value as i64,
            ValueType::Signed => Self::sign_extend(raw_value, length),
        })
    }

    /// Extract signal with little-endian (Intel) byte order
    ///
    /// Start bit points to the LSB; bits are numbered LSB to MSB within
    /// each byte and byte 0 is the first payload byte.
    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> Option<u64> {
        if start_bit + length > data.len() * 8 {
            return None;
        }

        let mut result: u64 = 0;
        for i in 0..length {
            let bit_pos = start_bit + i;
            let bit_value = (data[bit_pos / 8] >> (bit_pos % 8)) & 0x01;
            result |= (bit_value as u64) << i;
        }

        Some(result)
    }

    /// Extract signal with big-endian (Motorola) byte order
    ///
    /// Start bit points to the MSB in DBC numbering (bit 7 of a byte is its
    /// MSB). The signal continues towards the LSB of that byte and then
    /// wraps to the MSB of the next byte.
    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> Option<u64> {
        let mut result: u64 = 0;
        let mut bit_pos = start_bit;

        for i in 0..length {
            let byte = *data.get(bit_pos / 8)?;
            let bit_value = (byte >> (bit_pos % 8)) & 0x01;
            result = (result << 1) | bit_value as u64;

            if i + 1 < length {
                bit_pos = if bit_pos % 8 == 0 { bit_pos + 15 } else { bit_pos - 1 };
            }
        }

        Some(result)
    }

    /// Sign-extend a value from N bits to 64 bits
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}
