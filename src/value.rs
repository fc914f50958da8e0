//! Typed values stored as a type discriminant byte followed by a payload.

use std::fmt;

use crate::error::{Error, Result};
use crate::key::{read_utf16, utf16_payload, write_utf16};

/// Value type discriminants as persisted in the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Binary = 1,
    String = 2,
    Number = 3,
    Boolean = 4,
}

impl ValueType {
    pub fn discriminant(self) -> u8 {
        self as u8
    }

    pub fn from_discriminant(tag: u8) -> Result<ValueType> {
        match tag {
            1 => Ok(ValueType::Binary),
            2 => Ok(ValueType::String),
            3 => Ok(ValueType::Number),
            4 => Ok(ValueType::Boolean),
            other => Err(Error::UnknownValueType(other)),
        }
    }
}

/// An owned, typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Binary(Vec<u8>),
    Number(f64),
    Boolean(bool),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Binary(_) => ValueType::Binary,
            Value::Number(_) => ValueType::Number,
            Value::Boolean(_) => ValueType::Boolean,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Binary(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// UTF-16 text borrowed from stored bytes, terminator excluded.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Utf16Str<'a> {
    units: &'a [u8],
}

impl<'a> Utf16Str<'a> {
    /// Number of UTF-16 code units.
    pub fn len(&self) -> usize {
        self.units.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn code_units(&self) -> impl Iterator<Item = u16> + 'a {
        self.units
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }

    /// Decode into an owned string, failing on unpaired surrogates.
    pub fn to_string_checked(&self) -> Result<String> {
        char::decode_utf16(self.code_units())
            .collect::<std::result::Result<String, _>>()
            .map_err(|_| Error::MalformedValue("string is not valid UTF-16"))
    }
}

impl fmt::Debug for Utf16Str<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lossy: String = char::decode_utf16(self.code_units())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        write!(f, "{:?}", lossy)
    }
}

/// A value decoded in place, borrowing from engine-owned bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    String(Utf16Str<'a>),
    Binary(&'a [u8]),
    Number(f64),
    Boolean(bool),
}

impl ValueRef<'_> {
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            ValueRef::String(s) => Value::String(s.to_string_checked()?),
            ValueRef::Binary(b) => Value::Binary(b.to_vec()),
            ValueRef::Number(n) => Value::Number(*n),
            ValueRef::Boolean(b) => Value::Boolean(*b),
        })
    }
}

/// Encode a value as discriminant byte + payload.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = vec![value.value_type().discriminant()];
    match value {
        Value::String(s) => write_utf16(s, &mut out),
        Value::Binary(b) => out.extend_from_slice(b),
        Value::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
        Value::Boolean(b) => out.push(u8::from(*b)),
    }
    out
}

/// Decode stored bytes into an owned value.
///
/// With `requested` set the payload is reinterpreted as that type without
/// consulting the discriminant; with `None` the discriminant decides.
pub fn decode_value(bytes: &[u8], requested: Option<ValueType>) -> Result<Value> {
    let (value_type, payload) = split_discriminant(bytes, requested)?;
    match value_type {
        ValueType::String => read_utf16(payload).map(Value::String),
        _ => decode_value_ref(bytes, Some(value_type))?.to_value(),
    }
}

/// Decode stored bytes in place.
pub fn decode_value_ref(bytes: &[u8], requested: Option<ValueType>) -> Result<ValueRef<'_>> {
    let (value_type, payload) = split_discriminant(bytes, requested)?;
    match value_type {
        ValueType::String => Ok(ValueRef::String(Utf16Str {
            units: utf16_payload(payload)?,
        })),
        ValueType::Binary => Ok(ValueRef::Binary(payload)),
        ValueType::Number => {
            let raw: [u8; 8] = payload
                .try_into()
                .map_err(|_| Error::MalformedValue("number record must hold 8 bytes"))?;
            Ok(ValueRef::Number(f64::from_le_bytes(raw)))
        }
        ValueType::Boolean => match payload {
            [b] => Ok(ValueRef::Boolean(*b != 0)),
            _ => Err(Error::MalformedValue("boolean record must hold 1 byte")),
        },
    }
}

fn split_discriminant(bytes: &[u8], requested: Option<ValueType>) -> Result<(ValueType, &[u8])> {
    let (tag, payload) = bytes
        .split_first()
        .ok_or(Error::MalformedValue("value has no type discriminant"))?;
    let value_type = match requested {
        Some(value_type) => value_type,
        None => ValueType::from_discriminant(*tag)?,
    };
    Ok((value_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_decode_recovers_type() {
        for value in [
            Value::from("héllo, yöu"),
            Value::Binary(vec![1, 2, 3]),
            Value::Number(42.5),
            Value::Boolean(true),
        ] {
            assert_eq!(decode_value(&encode_value(&value), None).unwrap(), value);
        }
    }

    #[test]
    fn layout_is_discriminant_then_payload() {
        assert_eq!(encode_value(&Value::Boolean(true)), vec![4, 1]);
        assert_eq!(encode_value(&Value::from("a")), vec![2, 0, b'a', 0, 0]);
        assert_eq!(encode_value(&Value::Binary(vec![9])), vec![1, 9]);
        assert_eq!(encode_value(&Value::Number(1.0)).len(), 9);
    }

    #[test]
    fn explicit_decode_reinterprets() {
        let bytes = encode_value(&Value::from("abc"));
        assert_eq!(
            decode_value(&bytes, Some(ValueType::Binary)).unwrap(),
            Value::Binary(bytes[1..].to_vec())
        );
        assert!(decode_value(&bytes, Some(ValueType::Number)).is_err());
    }

    #[test]
    fn borrowed_string_view() {
        let bytes = encode_value(&Value::from("zero copy"));
        match decode_value_ref(&bytes, None).unwrap() {
            ValueRef::String(s) => {
                assert_eq!(s.len(), 9);
                assert_eq!(s.to_string_checked().unwrap(), "zero copy");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_inputs() {
        assert!(matches!(decode_value(&[], None), Err(Error::MalformedValue(_))));
        assert!(matches!(
            decode_value(&[9, 1], None),
            Err(Error::UnknownValueType(9))
        ));
        assert!(matches!(
            decode_value(&[2, 0, b'a'], None),
            Err(Error::MalformedValue(_))
        ));
        assert!(matches!(
            decode_value(&[4, 1, 1], None),
            Err(Error::MalformedValue(_))
        ));
    }
}
