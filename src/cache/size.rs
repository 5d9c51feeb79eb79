//! Size Estimation
//!
//! Approximate byte footprint of a cached value, used by every admission and
//! eviction decision in both local tiers.
//!
//! | Shape                         | Estimate                      |
//! |-------------------------------|-------------------------------|
//! | null / unit / `None`          | 0                             |
//! | bool                          | 4                             |
//! | integer / float               | 8                             |
//! | string                        | UTF-16 code units * 2         |
//! | binary (`serialize_bytes`)    | exact length                  |
//! | anything else                 | compact JSON length * 2       |
//! | unserializable                | 1024                          |
//!
//! The top-level shape is classified with a probing `Serializer` so that
//! scalars and blobs never pay for a JSON encode.

use std::fmt;

use serde::ser::{self, Impossible, Serialize, Serializer};

/// Estimate for null-like values
pub const NULL_SIZE: u64 = 0;

/// Estimate for booleans
pub const BOOL_SIZE: u64 = 4;

/// Estimate for any numeric value
pub const NUMBER_SIZE: u64 = 8;

/// Estimate used when a value cannot be serialized
pub const FALLBACK_SIZE: u64 = 1024;

/// Estimate the in-cache footprint of `value`. Never fails.
pub fn estimate_size<V: Serialize + ?Sized>(value: &V) -> u64 {
    match value.serialize(ShapeProbe) {
        Ok(size) => size,
        Err(ProbeError::Compound) => match serde_json::to_string(value) {
            Ok(text) => text_size(&text),
            Err(_) => FALLBACK_SIZE,
        },
        Err(ProbeError::Custom(_)) => FALLBACK_SIZE,
    }
}

#[inline]
fn text_size(s: &str) -> u64 {
    s.encode_utf16().count() as u64 * 2
}

#[derive(Debug)]
enum ProbeError {
    /// Shape needs a full textual encoding
    Compound,
    /// The value's own `Serialize` impl failed
    Custom(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Compound => write!(f, "compound value"),
            ProbeError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

impl ser::Error for ProbeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ProbeError::Custom(msg.to_string())
    }
}

/// Serializer that only looks at the outermost shape of a value
struct ShapeProbe;

type Compound = Impossible<u64, ProbeError>;

impl Serializer for ShapeProbe {
    type Ok = u64;
    type Error = ProbeError;
    type SerializeSeq = Compound;
    type SerializeTuple = Compound;
    type SerializeTupleStruct = Compound;
    type SerializeTupleVariant = Compound;
    type SerializeMap = Compound;
    type SerializeStruct = Compound;
    type SerializeStructVariant = Compound;

    fn serialize_bool(self, _v: bool) -> Result<u64, ProbeError> {
        Ok(BOOL_SIZE)
    }

    fn serialize_i8(self, _v: i8) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_i16(self, _v: i16) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_i32(self, _v: i32) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_i64(self, _v: i64) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_i128(self, _v: i128) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_u8(self, _v: u8) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_u16(self, _v: u16) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_u32(self, _v: u32) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_u64(self, _v: u64) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_u128(self, _v: u128) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_f32(self, _v: f32) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_f64(self, _v: f64) -> Result<u64, ProbeError> {
        Ok(NUMBER_SIZE)
    }

    fn serialize_char(self, v: char) -> Result<u64, ProbeError> {
        Ok(v.len_utf16() as u64 * 2)
    }

    fn serialize_str(self, v: &str) -> Result<u64, ProbeError> {
        Ok(text_size(v))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<u64, ProbeError> {
        Ok(v.len() as u64)
    }

    fn serialize_none(self) -> Result<u64, ProbeError> {
        Ok(NULL_SIZE)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<u64, ProbeError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<u64, ProbeError> {
        Ok(NULL_SIZE)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<u64, ProbeError> {
        Ok(NULL_SIZE)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<u64, ProbeError> {
        Ok(text_size(variant))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<u64, ProbeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<u64, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound, ProbeError> {
        Err(ProbeError::Compound)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Video {
        url: String,
    }

    #[test]
    fn test_null_like_values() {
        assert_eq!(estimate_size(&()), 0);
        assert_eq!(estimate_size(&Option::<String>::None), 0);
        assert_eq!(estimate_size(&serde_json::Value::Null), 0);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(estimate_size(&true), BOOL_SIZE);
        assert_eq!(estimate_size(&42u32), NUMBER_SIZE);
        assert_eq!(estimate_size(&-7i64), NUMBER_SIZE);
        assert_eq!(estimate_size(&3.25f64), NUMBER_SIZE);
        assert_eq!(estimate_size(&Some(5u8)), NUMBER_SIZE);
    }

    #[test]
    fn test_strings_count_utf16_units() {
        assert_eq!(estimate_size("hello"), 10);
        assert_eq!(estimate_size(&"héllo".to_string()), 10);
        // Outside the BMP: one char, two UTF-16 units
        assert_eq!(estimate_size("😀"), 4);
        assert_eq!(estimate_size(&'a'), 2);
    }

    #[test]
    fn test_binary_blobs_are_exact() {
        let blob = bytes::Bytes::from_static(&[1, 2, 3, 4, 5]);
        assert_eq!(estimate_size(&blob), 5);
    }

    #[test]
    fn test_structures_use_json_length() {
        let video = Video {
            url: "a.mp4".into(),
        };
        // {"url":"a.mp4"}
        assert_eq!(estimate_size(&video), 15 * 2);

        let list = vec![1u8, 2, 3];
        // [1,2,3]
        assert_eq!(estimate_size(&list), 7 * 2);

        let json = serde_json::json!({"a": 1});
        assert_eq!(estimate_size(&json), "{\"a\":1}".len() as u64 * 2);
    }

    #[test]
    fn test_unserializable_falls_back() {
        let mut map: HashMap<(u8, u8), u8> = HashMap::new();
        map.insert((1, 2), 3);
        assert_eq!(estimate_size(&map), FALLBACK_SIZE);
    }

    #[test]
    fn test_deterministic() {
        let value = serde_json::json!({"tags": ["x", "y"], "n": 10});
        assert_eq!(estimate_size(&value), estimate_size(&value));
    }
}
