//! Typed keys and their byte representation.
//!
//! A database fixes its [`KeyType`] when it is opened; every key passed to it
//! is validated against that type before any engine call is made.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// Largest integer a host number can carry without losing precision.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Key representation of a database or cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// UTF-16 code units followed by a zero code unit
    String,
    /// Native-endian 4-byte unsigned integer
    Uint32,
    /// Native-endian 8-byte unsigned integer
    Uint64,
    /// Raw bytes
    Binary,
}

impl KeyType {
    /// Whether keys of this type are stored with the integer comparator.
    pub fn is_integer(self) -> bool {
        matches!(self, KeyType::Uint32 | KeyType::Uint64)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::String => "string",
            KeyType::Uint32 => "uint32",
            KeyType::Uint64 => "uint64",
            KeyType::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// A key as supplied by, or returned to, the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    String(String),
    Uint32(u32),
    Uint64(u64),
    Binary(Vec<u8>),
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::String(_) => KeyType::String,
            Key::Uint32(_) => KeyType::Uint32,
            Key::Uint64(_) => KeyType::Uint64,
            Key::Binary(_) => KeyType::Binary,
        }
    }

    /// Convert a loosely typed host value into a key of the inferred type.
    pub fn from_value(input: &Value) -> Result<Key> {
        match (infer_key_type(input), input) {
            (Some(KeyType::String), Value::String(s)) => Ok(Key::String(s.clone())),
            (Some(KeyType::Binary), Value::Binary(b)) => Ok(Key::Binary(b.clone())),
            (Some(KeyType::Uint32), Value::Number(n)) => Ok(Key::Uint32(*n as u32)),
            (Some(KeyType::Uint64), Value::Number(n)) => Ok(Key::Uint64(*n as u64)),
            _ => Err(Error::InvalidKey(format!("{:?} cannot be used as a key", input))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Uint32(n)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Uint64(n)
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key::Binary(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Key {
    fn from(b: &[u8; N]) -> Self {
        Key::Binary(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Binary(b)
    }
}

impl From<&Key> for Key {
    fn from(k: &Key) -> Self {
        k.clone()
    }
}

/// Explicit key representation hints (`keyIsString`, `keyIsUint32`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOptions {
    pub key_is_string: bool,
    pub key_is_uint32: bool,
    pub key_is_uint64: bool,
    pub key_is_binary: bool,
}

impl KeyOptions {
    fn requested(&self) -> Vec<KeyType> {
        [
            (self.key_is_string, KeyType::String),
            (self.key_is_uint32, KeyType::Uint32),
            (self.key_is_uint64, KeyType::Uint64),
            (self.key_is_binary, KeyType::Binary),
        ]
        .iter()
        .filter(|(flag, _)| *flag)
        .map(|(_, kt)| *kt)
        .collect()
    }
}

impl From<KeyType> for KeyOptions {
    fn from(kt: KeyType) -> Self {
        KeyOptions {
            key_is_string: kt == KeyType::String,
            key_is_uint32: kt == KeyType::Uint32,
            key_is_uint64: kt == KeyType::Uint64,
            key_is_binary: kt == KeyType::Binary,
        }
    }
}

/// Resolve the key type for an operation.
///
/// `fixed` is the type already bound to the database, or `None` while a
/// database is being opened (strings are the default then). An explicit hint
/// must agree with a fixed type; more than one hint is always rejected.
pub fn resolve_key_type(explicit: &KeyOptions, fixed: Option<KeyType>) -> Result<KeyType> {
    let requested = explicit.requested();
    match (requested.as_slice(), fixed) {
        ([], Some(kt)) => Ok(kt),
        ([], None) => Ok(KeyType::String),
        ([kt], None) => Ok(*kt),
        ([kt], Some(fixed)) if *kt == fixed => Ok(fixed),
        ([kt], Some(fixed)) => Err(Error::KeyTypeMismatch {
            expected: fixed,
            found: *kt,
        }),
        _ => Err(Error::ConflictingKeyTypes),
    }
}

/// Infer which key type a host value maps to, if any.
pub fn infer_key_type(input: &Value) -> Option<KeyType> {
    match input {
        Value::String(_) => Some(KeyType::String),
        Value::Binary(_) => Some(KeyType::Binary),
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => {
            if *n <= u32::MAX as f64 {
                Some(KeyType::Uint32)
            } else if *n <= MAX_SAFE_INTEGER {
                Some(KeyType::Uint64)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Encode a key for a database whose key type is `key_type`.
pub fn encode_key(key: &Key, key_type: KeyType) -> Result<Vec<u8>> {
    if key.key_type() != key_type {
        return Err(Error::KeyTypeMismatch {
            expected: key_type,
            found: key.key_type(),
        });
    }

    let bytes = match key {
        Key::String(s) => {
            let mut out = Vec::with_capacity((s.len() + 1) * 2);
            write_utf16(s, &mut out);
            out
        }
        Key::Uint32(n) => n.to_ne_bytes().to_vec(),
        Key::Uint64(n) => n.to_ne_bytes().to_vec(),
        Key::Binary(b) => {
            if b.is_empty() {
                return Err(Error::InvalidKey("binary keys must not be empty".into()));
            }
            b.clone()
        }
    };
    Ok(bytes)
}

/// Decode stored key bytes as `key_type`.
pub fn decode_key(bytes: &[u8], key_type: KeyType) -> Result<Key> {
    match key_type {
        KeyType::String => read_utf16(bytes).map(Key::String),
        KeyType::Uint32 => {
            let raw: [u8; 4] = bytes
                .try_into()
                .map_err(|_| Error::MalformedValue("uint32 key must be 4 bytes"))?;
            Ok(Key::Uint32(u32::from_ne_bytes(raw)))
        }
        KeyType::Uint64 => {
            let raw: [u8; 8] = bytes
                .try_into()
                .map_err(|_| Error::MalformedValue("uint64 key must be 8 bytes"))?;
            Ok(Key::Uint64(u64::from_ne_bytes(raw)))
        }
        KeyType::Binary => Ok(Key::Binary(bytes.to_vec())),
    }
}

/// Append `s` as big-endian UTF-16 code units plus a zero terminator.
///
/// Big-endian units keep byte-wise ordering equal to code-unit ordering.
pub(crate) fn write_utf16(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out.extend_from_slice(&[0, 0]);
}

/// Strip and check the zero terminator, returning the code-unit bytes.
pub(crate) fn utf16_payload(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 2 {
        return Err(Error::MalformedValue("string is shorter than its terminator"));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::MalformedValue("string has an odd number of bytes"));
    }
    let (payload, terminator) = bytes.split_at(bytes.len() - 2);
    if terminator != [0, 0] {
        return Err(Error::MalformedValue("string is not zero-terminated"));
    }
    Ok(payload)
}

pub(crate) fn read_utf16(bytes: &[u8]) -> Result<String> {
    let payload = utf16_payload(bytes)?;
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| Error::MalformedValue("string is not valid UTF-16"))
}
