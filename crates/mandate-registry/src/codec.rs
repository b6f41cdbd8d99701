//! ABI word codec for registry calldata and return data.
//!
//! Covers exactly the encoding the permission registry contract speaks:
//! 32-byte head words, dynamic tails addressed by offset, and the tagged
//! parameter values a grant carries. Every read is bounds-checked; a
//! malformed response surfaces as a [`CodecError`] instead of a panic.

use mandate_types::Address;
use serde_json::{json, Value};
use thiserror::Error;

/// ABI word size in bytes.
pub(crate) const WORD: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("data truncated: wanted {wanted} bytes at offset {offset}, have {have}")]
    Truncated {
        offset: usize,
        wanted: usize,
        have: usize,
    },

    #[error("offset arithmetic overflow at {0}")]
    OffsetOverflow(usize),

    #[error("value at offset {offset} does not fit in a {what}")]
    Overflow { offset: usize, what: &'static str },

    #[error("word at offset {offset} is not a canonical {what}")]
    NonCanonical { offset: usize, what: &'static str },

    #[error("string at offset {0} is not valid utf-8")]
    InvalidUtf8(usize),

    #[error("unknown parameter type tag {0}")]
    UnknownTypeTag(u8),
}

pub(crate) fn add(offset: usize, delta: usize) -> Result<usize, CodecError> {
    offset
        .checked_add(delta)
        .ok_or(CodecError::OffsetOverflow(offset))
}

/// Cursor over ABI-encoded data. Offsets are absolute within the slice.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word(&self, offset: usize) -> Result<&'a [u8], CodecError> {
        let end = add(offset, WORD)?;
        if end > self.data.len() {
            return Err(CodecError::Truncated {
                offset,
                wanted: WORD,
                have: self.data.len().saturating_sub(offset),
            });
        }
        Ok(&self.data[offset..end])
    }

    /// A word interpreted as an offset or length.
    pub(crate) fn usize_at(&self, offset: usize) -> Result<usize, CodecError> {
        let value = self.u64_at(offset)?;
        usize::try_from(value).map_err(|_| CodecError::Overflow {
            offset,
            what: "usize",
        })
    }

    pub(crate) fn u64_at(&self, offset: usize) -> Result<u64, CodecError> {
        let word = self.word(offset)?;
        if word[..WORD - 8].iter().any(|byte| *byte != 0) {
            return Err(CodecError::Overflow {
                offset,
                what: "u64",
            });
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[WORD - 8..]);
        Ok(u64::from_be_bytes(buf))
    }

    pub(crate) fn u32_at(&self, offset: usize) -> Result<u32, CodecError> {
        let value = self.u64_at(offset)?;
        u32::try_from(value).map_err(|_| CodecError::Overflow {
            offset,
            what: "u32",
        })
    }

    pub(crate) fn u8_at(&self, offset: usize) -> Result<u8, CodecError> {
        let value = self.u64_at(offset)?;
        u8::try_from(value).map_err(|_| CodecError::Overflow {
            offset,
            what: "u8",
        })
    }

    pub(crate) fn bool_at(&self, offset: usize) -> Result<bool, CodecError> {
        let word = self.word(offset)?;
        if word[..WORD - 1].iter().any(|byte| *byte != 0) || word[WORD - 1] > 1 {
            return Err(CodecError::NonCanonical {
                offset,
                what: "bool",
            });
        }
        Ok(word[WORD - 1] == 1)
    }

    pub(crate) fn address_at(&self, offset: usize) -> Result<Address, CodecError> {
        let word = self.word(offset)?;
        if word[..12].iter().any(|byte| *byte != 0) {
            return Err(CodecError::NonCanonical {
                offset,
                what: "address",
            });
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Ok(Address::new(bytes))
    }

    pub(crate) fn uint256_at(&self, offset: usize) -> Result<Value, CodecError> {
        Ok(uint_word_to_value(self.word(offset)?))
    }

    pub(crate) fn int256_at(&self, offset: usize) -> Result<Value, CodecError> {
        Ok(int_word_to_value(self.word(offset)?))
    }

    /// Dynamic `bytes` whose length word sits at `offset`.
    pub(crate) fn bytes_at(&self, offset: usize) -> Result<&'a [u8], CodecError> {
        let length = self.usize_at(offset)?;
        let start = add(offset, WORD)?;
        let end = add(start, length)?;
        if end > self.data.len() {
            return Err(CodecError::Truncated {
                offset: start,
                wanted: length,
                have: self.data.len().saturating_sub(start),
            });
        }
        Ok(&self.data[start..end])
    }

    pub(crate) fn string_at(&self, offset: usize) -> Result<String, CodecError> {
        let bytes = self.bytes_at(offset)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8(offset))
    }

    /// Array header at `offset`: returns the element area base and the
    /// length, rejecting lengths the remaining data cannot hold.
    pub(crate) fn array_at(&self, offset: usize) -> Result<(usize, usize), CodecError> {
        let length = self.usize_at(offset)?;
        let base = add(offset, WORD)?;
        let available = self.data.len().saturating_sub(base);
        if length > available / WORD {
            return Err(CodecError::Truncated {
                offset: base,
                wanted: length.saturating_mul(WORD),
                have: available,
            });
        }
        Ok((base, length))
    }
}

fn uint_word_to_value(word: &[u8]) -> Value {
    if word[..WORD - 8].iter().all(|byte| *byte == 0) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[WORD - 8..]);
        return json!(u64::from_be_bytes(buf));
    }
    Value::String(decimal_string(word))
}

fn int_word_to_value(word: &[u8]) -> Value {
    if word[0] & 0x80 == 0 {
        return uint_word_to_value(word);
    }
    let mut magnitude = word.to_vec();
    twos_complement_negate(&mut magnitude);
    if magnitude[..WORD - 8].iter().all(|byte| *byte == 0) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&magnitude[WORD - 8..]);
        let value = u64::from_be_bytes(buf);
        if value <= i64::MAX as u64 + 1 {
            return json!(-(value as i128) as i64);
        }
    }
    Value::String(format!("-{}", decimal_string(&magnitude)))
}

/// Base-10 rendering of a big-endian unsigned integer.
fn decimal_string(word: &[u8]) -> String {
    let mut scratch = word.to_vec();
    let mut digits = Vec::new();
    loop {
        let mut remainder = 0u32;
        let mut all_zero = true;
        for byte in scratch.iter_mut() {
            let acc = remainder * 256 + u32::from(*byte);
            *byte = (acc / 10) as u8;
            remainder = acc % 10;
            all_zero &= *byte == 0;
        }
        digits.push(char::from(b'0' + remainder as u8));
        if all_zero {
            break;
        }
    }
    digits.iter().rev().collect()
}

fn twos_complement_negate(word: &mut [u8]) {
    let mut carry = true;
    for byte in word.iter_mut().rev() {
        *byte = !*byte;
        if carry {
            let (value, overflow) = byte.overflowing_add(1);
            *byte = value;
            carry = overflow;
        }
    }
}

/// Value type tags carried by on-chain grant parameters, matching the
/// registry contract's ParameterType enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterType {
    Int256,
    Uint256,
    Bool,
    Address,
    String,
    Bytes,
    Uint256Array,
    AddressArray,
    StringArray,
}

impl ParameterType {
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(ParameterType::Int256),
            1 => Ok(ParameterType::Uint256),
            2 => Ok(ParameterType::Bool),
            3 => Ok(ParameterType::Address),
            4 => Ok(ParameterType::String),
            5 => Ok(ParameterType::Bytes),
            6 => Ok(ParameterType::Uint256Array),
            7 => Ok(ParameterType::AddressArray),
            8 => Ok(ParameterType::StringArray),
            other => Err(CodecError::UnknownTypeTag(other)),
        }
    }
}

/// Decode one `abi.encode`d parameter value into JSON per its tag.
///
/// Fixed-width integers that fit in 64 bits become JSON numbers; wider
/// values are rendered as decimal strings so nothing is silently
/// truncated. Addresses and raw bytes become 0x-prefixed hex strings.
pub fn decode_parameter(ty: ParameterType, data: &[u8]) -> Result<Value, CodecError> {
    let reader = Reader::new(data);
    match ty {
        ParameterType::Int256 => reader.int256_at(0),
        ParameterType::Uint256 => reader.uint256_at(0),
        ParameterType::Bool => reader.bool_at(0).map(Value::Bool),
        ParameterType::Address => reader
            .address_at(0)
            .map(|address| Value::String(address.to_string())),
        ParameterType::String => {
            let offset = reader.usize_at(0)?;
            reader.string_at(offset).map(Value::String)
        }
        ParameterType::Bytes => {
            let offset = reader.usize_at(0)?;
            reader
                .bytes_at(offset)
                .map(|bytes| Value::String(format!("0x{}", hex::encode(bytes))))
        }
        ParameterType::Uint256Array => {
            let offset = reader.usize_at(0)?;
            let (base, length) = reader.array_at(offset)?;
            let mut items = Vec::with_capacity(length);
            for index in 0..length {
                items.push(reader.uint256_at(add(base, index * WORD)?)?);
            }
            Ok(Value::Array(items))
        }
        ParameterType::AddressArray => {
            let offset = reader.usize_at(0)?;
            let (base, length) = reader.array_at(offset)?;
            let mut items = Vec::with_capacity(length);
            for index in 0..length {
                let address = reader.address_at(add(base, index * WORD)?)?;
                items.push(Value::String(address.to_string()));
            }
            Ok(Value::Array(items))
        }
        ParameterType::StringArray => {
            let offset = reader.usize_at(0)?;
            let (base, length) = reader.array_at(offset)?;
            let mut items = Vec::with_capacity(length);
            for index in 0..length {
                let element = add(base, reader.usize_at(add(base, index * WORD)?)?)?;
                items.push(Value::String(reader.string_at(element)?));
            }
            Ok(Value::Array(items))
        }
    }
}

pub(crate) fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

pub(crate) fn push_word_usize(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&[0u8; WORD - 8]);
    out.extend_from_slice(&(value as u64).to_be_bytes());
}

pub(crate) fn push_word_address(out: &mut Vec<u8>, address: Address) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(address.as_bytes());
}

/// Length-prefixed dynamic bytes, zero-padded to a word boundary.
pub(crate) fn push_dynamic_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    push_word_usize(out, bytes.len());
    out.extend_from_slice(bytes);
    out.resize(out.len() + padded_len(bytes.len()) - bytes.len(), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_u64(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        push_word_usize(&mut out, value as usize);
        out
    }

    #[test]
    fn u64_round_trips_through_a_word() {
        let data = word_u64(7);
        assert_eq!(Reader::new(&data).u64_at(0), Ok(7));
    }

    #[test]
    fn u64_rejects_wide_values() {
        let mut data = vec![0u8; WORD];
        data[0] = 1;
        assert_eq!(
            Reader::new(&data).u64_at(0),
            Err(CodecError::Overflow {
                offset: 0,
                what: "u64"
            })
        );
    }

    #[test]
    fn truncated_word_is_an_error() {
        let data = vec![0u8; 16];
        assert!(matches!(
            Reader::new(&data).u64_at(0),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn bool_requires_canonical_words() {
        let mut data = word_u64(1);
        assert_eq!(Reader::new(&data).bool_at(0), Ok(true));
        data[WORD - 1] = 2;
        assert!(matches!(
            Reader::new(&data).bool_at(0),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn address_rejects_dirty_padding() {
        let mut data = Vec::new();
        push_word_address(
            &mut data,
            "0x00000000000000000000000000000000000000aa"
                .parse()
                .unwrap(),
        );
        let decoded = Reader::new(&data).address_at(0).unwrap();
        assert_eq!(
            decoded.to_string(),
            "0x00000000000000000000000000000000000000aa"
        );

        data[0] = 0xff;
        assert!(matches!(
            Reader::new(&data).address_at(0),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn small_uint256_becomes_a_number() {
        let data = word_u64(250);
        assert_eq!(Reader::new(&data).uint256_at(0), Ok(json!(250)));
    }

    #[test]
    fn wide_uint256_becomes_a_decimal_string() {
        // 2^64 does not fit a u64.
        let mut data = vec![0u8; WORD];
        data[WORD - 9] = 1;
        assert_eq!(
            Reader::new(&data).uint256_at(0),
            Ok(json!("18446744073709551616"))
        );
    }

    #[test]
    fn negative_int256_becomes_a_negative_number() {
        let data = vec![0xffu8; WORD];
        assert_eq!(Reader::new(&data).int256_at(0), Ok(json!(-1)));
    }

    #[test]
    fn wide_negative_int256_becomes_a_decimal_string() {
        // -(2^64): two's complement of 2^64.
        let mut data = vec![0u8; WORD];
        data[WORD - 9] = 1;
        twos_complement_negate(&mut data);
        assert_eq!(
            Reader::new(&data).int256_at(0),
            Ok(json!("-18446744073709551616"))
        );
    }

    #[test]
    fn string_parameter_decodes() {
        let mut data = Vec::new();
        push_word_usize(&mut data, WORD);
        push_dynamic_bytes(&mut data, b"QmSpend");
        assert_eq!(
            decode_parameter(ParameterType::String, &data),
            Ok(json!("QmSpend"))
        );
    }

    #[test]
    fn invalid_utf8_string_is_an_error() {
        let mut data = Vec::new();
        push_word_usize(&mut data, WORD);
        push_dynamic_bytes(&mut data, &[0xff, 0xfe]);
        assert!(matches!(
            decode_parameter(ParameterType::String, &data),
            Err(CodecError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn bytes_parameter_decodes_to_hex() {
        let mut data = Vec::new();
        push_word_usize(&mut data, WORD);
        push_dynamic_bytes(&mut data, &[0xde, 0xad]);
        assert_eq!(
            decode_parameter(ParameterType::Bytes, &data),
            Ok(json!("0xdead"))
        );
    }

    #[test]
    fn uint256_array_decodes() {
        let mut data = Vec::new();
        push_word_usize(&mut data, WORD);
        push_word_usize(&mut data, 2);
        push_word_usize(&mut data, 10);
        push_word_usize(&mut data, 20);
        assert_eq!(
            decode_parameter(ParameterType::Uint256Array, &data),
            Ok(json!([10, 20]))
        );
    }

    #[test]
    fn array_length_exceeding_data_is_an_error() {
        let mut data = Vec::new();
        push_word_usize(&mut data, WORD);
        push_word_usize(&mut data, 1000);
        assert!(matches!(
            decode_parameter(ParameterType::Uint256Array, &data),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn string_array_decodes() {
        let mut data = Vec::new();
        push_word_usize(&mut data, WORD); // offset to array
        push_word_usize(&mut data, 2); // length
        push_word_usize(&mut data, 2 * WORD); // element 0, relative to base
        push_word_usize(&mut data, 4 * WORD); // element 1
        push_dynamic_bytes(&mut data, b"alpha");
        push_dynamic_bytes(&mut data, b"beta");
        assert_eq!(
            decode_parameter(ParameterType::StringArray, &data),
            Ok(json!(["alpha", "beta"]))
        );
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert_eq!(
            ParameterType::from_tag(9),
            Err(CodecError::UnknownTypeTag(9))
        );
    }
}
