use crate::catalog::types::Value;
use crate::storage::engine::EngineError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

const TAG_NUMBER: u8 = 0x10;
const TAG_TIMESTAMP: u8 = 0x20;
const TAG_TEXT: u8 = 0x30;
const TAG_BLOB: u8 = 0x40;
const TAG_ARRAY: u8 = 0x50;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Byte encoding of a key whose lexicographic order equals [`Value`] order.
/// Maps keyed by it iterate in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncodedKey {
    bytes: SmallVec<[u8; 32]>,
}

impl EncodedKey {
    pub fn from_key(key: &Value) -> Result<Self, EngineError> {
        let mut out = SmallVec::<[u8; 32]>::new();
        encode_key(key, &mut out)?;
        Ok(Self { bytes: out })
    }
}

fn encode_key(v: &Value, out: &mut SmallVec<[u8; 32]>) -> Result<(), EngineError> {
    match v {
        Value::Integer(i) => {
            let approx = *i as f64;
            let offset = i128::from(*i) - approx as i128;
            encode_number(approx, offset as i32, out);
        }
        Value::Float(f) if !f.is_nan() => encode_number(*f, 0, out),
        Value::Timestamp(ts) => {
            out.push(TAG_TIMESTAMP);
            let shifted = (*ts as u64) ^ 0x8000_0000_0000_0000;
            out.extend_from_slice(&shifted.to_be_bytes());
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            append_escaped(s.as_bytes(), out);
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            append_escaped(b, out);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            for item in items {
                encode_key(item, out)?;
            }
            out.push(TERMINATOR);
        }
        other => {
            return Err(EngineError::Data(format!(
                "{} is not a valid key",
                other.kind_name()
            )));
        }
    }
    Ok(())
}

/// Nearest `f64` followed by the exact distance to it. Only integers
/// beyond 2^53 have a non-zero offset, and it never exceeds 2^10.
fn encode_number(f: f64, offset: i32, out: &mut SmallVec<[u8; 32]>) {
    out.push(TAG_NUMBER);
    // -0.0 and 0.0 are the same key.
    let f = if f == 0.0 { 0.0 } else { f };
    let bits = f.to_bits();
    let mapped = if (bits >> 63) == 1 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    };
    out.extend_from_slice(&mapped.to_be_bytes());
    out.extend_from_slice(&((offset as u32) ^ 0x8000_0000).to_be_bytes());
}

fn append_escaped(bytes: &[u8], out: &mut SmallVec<[u8; 32]>) {
    for byte in bytes {
        if *byte == TERMINATOR {
            // Escape interior nulls so terminator remains unambiguous.
            out.extend_from_slice(&[TERMINATOR, ESCAPE]);
        } else {
            out.push(*byte);
        }
    }
    out.push(TERMINATOR);
}

#[cfg(test)]
mod tests {
    use super::EncodedKey;
    use crate::catalog::types::Value;
    use proptest::prelude::*;

    fn key(v: Value) -> EncodedKey {
        EncodedKey::from_key(&v).expect("valid key")
    }

    fn arb_key() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Integer),
            (-2048i64..2048).prop_map(|d| Value::Integer((1 << 53) + d)),
            (-2048i64..2048).prop_map(|d| Value::Integer(i64::MAX - d.abs())),
            (-2048i64..2048).prop_map(|d| Value::Integer(i64::MIN + d.abs())),
            any::<f64>()
                .prop_filter("finite float only", |v| v.is_finite())
                .prop_map(Value::Float),
            (-2048i64..2048).prop_map(|d| Value::Float(((1i64 << 53) + d) as f64)),
            any::<i64>().prop_map(Value::Timestamp),
            "\\PC{0,16}".prop_map(|s| Value::Text(s.into())),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Value::Array)
        })
    }

    proptest! {
        #[test]
        fn encoding_preserves_value_order(a in arb_key(), b in arb_key()) {
            prop_assert_eq!(a.cmp(&b), key(a.clone()).cmp(&key(b.clone())));
        }

        #[test]
        fn whole_floats_encode_as_integers(i in -(1i64 << 53)..(1i64 << 53)) {
            prop_assert_eq!(key(Value::Integer(i)), key(Value::Float(i as f64)));
        }

        #[test]
        fn equal_encodings_mean_equal_values(a in arb_key(), b in arb_key()) {
            prop_assert_eq!(a == b, key(a.clone()) == key(b.clone()));
        }
    }

    #[test]
    fn integers_beyond_float_precision_stay_distinct() {
        let edge = 1i64 << 53;
        assert!(key(Value::Integer(edge)) < key(Value::Integer(edge + 1)));
        assert!(key(Value::Integer(edge + 1)) < key(Value::Integer(edge + 2)));
        assert_eq!(key(Value::Integer(edge)), key(Value::Float(edge as f64)));
        assert!(key(Value::Float(edge as f64)) < key(Value::Integer(edge + 1)));
        assert!(key(Value::Integer(i64::MAX - 1)) < key(Value::Integer(i64::MAX)));
        assert!(key(Value::Integer(i64::MAX)) < key(Value::Float(f64::INFINITY)));
        assert!(key(Value::Integer(i64::MIN)) < key(Value::Integer(i64::MIN + 1)));
        assert_eq!(key(Value::Integer(i64::MIN)), key(Value::Float(i64::MIN as f64)));
    }

    #[test]
    fn integer_and_float_keys_coincide() {
        assert_eq!(key(Value::Integer(4)), key(Value::Float(4.0)));
        assert!(key(Value::Integer(-1)) < key(Value::Float(-0.5)));
    }

    #[test]
    fn text_with_interior_null_sorts_after_prefix() {
        assert!(key(Value::from("a")) < key(Value::from("a\0")));
        assert!(key(Value::from("a\0")) < key(Value::from("ab")));
    }

    #[test]
    fn non_key_values_are_data_errors() {
        assert!(EncodedKey::from_key(&Value::Boolean(true)).is_err());
        assert!(EncodedKey::from_key(&Value::Float(f64::NAN)).is_err());
    }
}
