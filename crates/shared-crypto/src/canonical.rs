//! # Canonical Value Encoding
//!
//! A deterministic, binary-safe serialization of [`Value`] producing stable
//! bytes for hashing and signing. Two structurally equal values encode to
//! identical bytes on every node, every time.
//!
//! ## Encoding
//!
//! Each value is a one-byte tag followed by a fixed-width or
//! length-prefixed body. All multi-byte integers are big-endian.
//!
//! | Tag | Shape | Body |
//! |-----|-------|------|
//! | `0x00` | Null | — |
//! | `0x01` | Bool | 1 byte (0/1) |
//! | `0x02` | Int | 8 bytes, two's complement |
//! | `0x03` | Float | 8 bytes, normalized IEEE-754 bits |
//! | `0x04` | Str | u64 length + UTF-8 bytes |
//! | `0x05` | Bytes | u64 length + raw bytes |
//! | `0x06` | List | u64 count + encoded items |
//! | `0x07` | Map | u64 count + (key, value) pairs in key order |
//!
//! Float normalization: `-0.0` encodes as `0.0` and every NaN encodes as
//! the single quiet-NaN pattern, so equal-by-arithmetic floats hash equal.

use shared_types::Value;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STR: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_LIST: u8 = 0x06;
const TAG_MAP: u8 = 0x07;

/// The single canonical quiet-NaN bit pattern.
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// Serializes a value into its canonical byte form.
///
/// Map keys are already sorted (`BTreeMap`), so encoding order is the key
/// order. The output is binary-safe: strings and bytes are length-prefixed,
/// never delimited.
#[must_use]
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&normalize_float_bits(*f).to_be_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STR);
            out.extend_from_slice(&(s.len() as u64).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u64).to_be_bytes());
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u64).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(map) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(map.len() as u64).to_be_bytes());
            for (key, val) in map {
                out.extend_from_slice(&(key.len() as u64).to_be_bytes());
                out.extend_from_slice(key.as_bytes());
                encode_into(val, out);
            }
        }
    }
}

/// Normalizes a float to its canonical bit pattern.
fn normalize_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        CANONICAL_NAN_BITS
    } else if f == 0.0 {
        // Collapses -0.0 and 0.0
        0u64
    } else {
        f.to_bits()
    }
}
