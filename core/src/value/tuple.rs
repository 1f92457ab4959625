//! Ordered tuple codec for key construction.
//!
//! Values encode so that the byte-lexicographic order of `pack` output matches the
//! natural order of the values: integers and doubles sign-flip into big-endian,
//! strings and byte arrays escape interior 0x00 as 0x00 0x01 and carry a bare 0x00
//! terminator. The escape continuation 0x01 is below every element tag, so a
//! terminator followed by the next element (including the null sentinel's 0xFF
//! lead) can never be misread as an escape. Type tags are chosen so different
//! types occupy disjoint, ordered tag ranges; the two-byte null sentinel
//! 0xFF 0x00 sorts null after every non-null value.

use thiserror::Error;

use super::FieldValue;

// Type tags, ordered: bool < int < double < string < bytes < array < null.
const TAG_BOOL: u8 = 0x10;
const TAG_INT: u8 = 0x20;
const TAG_DOUBLE: u8 = 0x30;
const TAG_STRING: u8 = 0x40;
const TAG_BYTES: u8 = 0x50;
const TAG_ARRAY: u8 = 0x60;
const NULL_SENTINEL: [u8; 2] = [0xFF, 0x00];

#[derive(Debug, Error, PartialEq)]
pub enum TupleError {
    #[error("unknown element tag 0x{0:02X}")]
    UnknownTag(u8),
    #[error("truncated tuple encoding")]
    UnexpectedEnd,
    #[error("invalid utf-8 in string element")]
    InvalidUtf8,
}

/// Encode a sequence of values as one ordered key fragment.
pub fn pack(values: &[FieldValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        encode_value(&mut out, v);
    }
    out
}

/// Decode every element of a packed fragment. Fails on unknown tags or truncation.
pub fn unpack(bytes: &[u8]) -> Result<Vec<FieldValue>, TupleError> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < bytes.len() {
        out.push(decode_value(bytes, &mut pos)?);
    }
    Ok(out)
}

pub fn encode_value(out: &mut Vec<u8>, value: &FieldValue) {
    match value {
        FieldValue::Null => out.extend_from_slice(&NULL_SENTINEL),
        FieldValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        FieldValue::Int(i) => {
            out.push(TAG_INT);
            // Sign flip keeps negatives below positives in byte order.
            out.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
        }
        FieldValue::Double(f) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&order_preserving_f64(*f).to_be_bytes());
        }
        FieldValue::String(s) => {
            out.push(TAG_STRING);
            encode_escaped(out, s.as_bytes());
        }
        FieldValue::Bytes(b) => {
            out.push(TAG_BYTES);
            encode_escaped(out, b);
        }
        FieldValue::Array(elems) => {
            // Nested tuple, count-prefixed. Arrays are not in the order-preservation set.
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(elems.len() as u32).to_be_bytes());
            for e in elems {
                encode_value(out, e);
            }
        }
    }
}

pub fn decode_value(bytes: &[u8], pos: &mut usize) -> Result<FieldValue, TupleError> {
    let tag = *bytes.get(*pos).ok_or(TupleError::UnexpectedEnd)?;
    *pos += 1;
    match tag {
        0xFF => {
            let next = *bytes.get(*pos).ok_or(TupleError::UnexpectedEnd)?;
            *pos += 1;
            if next != 0x00 {
                return Err(TupleError::UnknownTag(tag));
            }
            Ok(FieldValue::Null)
        }
        TAG_BOOL => {
            let b = *bytes.get(*pos).ok_or(TupleError::UnexpectedEnd)?;
            *pos += 1;
            Ok(FieldValue::Bool(b != 0))
        }
        TAG_INT => {
            let raw = take_u64(bytes, pos)?;
            Ok(FieldValue::Int((raw ^ (1 << 63)) as i64))
        }
        TAG_DOUBLE => {
            let raw = take_u64(bytes, pos)?;
            Ok(FieldValue::Double(restore_f64(raw)))
        }
        TAG_STRING => {
            let raw = decode_escaped(bytes, pos)?;
            String::from_utf8(raw).map(FieldValue::String).map_err(|_| TupleError::InvalidUtf8)
        }
        TAG_BYTES => Ok(FieldValue::Bytes(decode_escaped(bytes, pos)?)),
        TAG_ARRAY => {
            if bytes.len() < *pos + 4 {
                return Err(TupleError::UnexpectedEnd);
            }
            let count = u32::from_be_bytes(bytes[*pos..*pos + 4].try_into().expect("4 bytes")) as usize;
            *pos += 4;
            let mut elems = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                elems.push(decode_value(bytes, pos)?);
            }
            Ok(FieldValue::Array(elems))
        }
        other => Err(TupleError::UnknownTag(other)),
    }
}

/// IEEE-754 sign-flip rule: positives flip the sign bit, negatives flip every bit,
/// NaN pins to the top. Byte order of the result matches numeric order.
fn order_preserving_f64(f: f64) -> u64 {
    if f.is_nan() {
        u64::MAX
    } else {
        let bits = f.to_bits();
        if f >= 0.0 { bits ^ (1 << 63) } else { !bits }
    }
}

fn restore_f64(raw: u64) -> f64 {
    if raw == u64::MAX {
        f64::NAN
    } else if raw & (1 << 63) != 0 {
        f64::from_bits(raw ^ (1 << 63))
    } else {
        f64::from_bits(!raw)
    }
}

// 0x00 escapes to 0x00 0x01; an unescaped 0x00 terminates. The continuation
// byte must not collide with anything that can follow a terminator: element
// tags start at 0x10 and the null sentinel leads with 0xFF, so 0x01 is safe.
const ESCAPE_CONTINUATION: u8 = 0x01;

fn encode_escaped(out: &mut Vec<u8>, payload: &[u8]) {
    for &b in payload {
        if b == 0x00 {
            out.push(0x00);
            out.push(ESCAPE_CONTINUATION);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
}

fn decode_escaped(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>, TupleError> {
    let mut out = Vec::new();
    loop {
        let b = *bytes.get(*pos).ok_or(TupleError::UnexpectedEnd)?;
        *pos += 1;
        if b != 0x00 {
            out.push(b);
            continue;
        }
        match bytes.get(*pos) {
            Some(&ESCAPE_CONTINUATION) => {
                out.push(0x00);
                *pos += 1;
            }
            _ => return Ok(out),
        }
    }
}

fn take_u64(bytes: &[u8], pos: &mut usize) -> Result<u64, TupleError> {
    if bytes.len() < *pos + 8 {
        return Err(TupleError::UnexpectedEnd);
    }
    let raw = u64::from_be_bytes(bytes[*pos..*pos + 8].try_into().expect("8 bytes"));
    *pos += 8;
    Ok(raw)
}
