//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format used for the extended handshake and
//! every extension message payload. Four data types exist: integers
//! (`i42e`), byte strings (`4:spam`), lists (`l...e`) and dictionaries
//! (`d...e`, keys sorted lexicographically).
//!
//! Besides the strict [`decode`] (which rejects trailing bytes), this module
//! provides [`decode_prefix`] for frames where a bencoded header is followed
//! by raw payload bytes, as in metadata piece messages.
//!
//! ```
//! use btex::bencode::{decode, decode_prefix, encode, Value};
//!
//! let value = decode(b"d4:porti6881ee").unwrap();
//! assert_eq!(value.get(b"port").and_then(|v| v.as_integer()), Some(6881));
//!
//! let (header, consumed) = decode_prefix(b"d1:ai0eeRAWDATA").unwrap();
//! assert_eq!(consumed, 8);
//! assert!(header.as_dict().is_some());
//!
//! let encoded = encode(&Value::Integer(42)).unwrap();
//! assert_eq!(encoded, b"i42e");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

/// Maximum nesting depth accepted by the decoder.
const MAX_DEPTH: usize = 64;

/// Errors produced while decoding or encoding bencode data.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected character: {0}")]
    UnexpectedChar(char),

    #[error("trailing data after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string, not necessarily valid UTF-8.
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string if it is a valid UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key if this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

/// Decodes a complete bencode value.
///
/// Fails with [`BencodeError::TrailingData`] if any input remains after the
/// value.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Decodes the leading bencode value and returns it together with the number
/// of bytes it occupied.
///
/// Bytes after the value are left untouched; metadata piece frames carry the
/// raw fragment there.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    Ok((value, pos))
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.get(*pos) {
        Some(b'i') => decode_integer(data, pos),
        Some(b'l') => decode_list(data, pos, depth),
        Some(b'd') => decode_dict(data, pos, depth),
        Some(b'0'..=b'9') => decode_bytes(data, pos),
        Some(&c) => Err(BencodeError::UnexpectedChar(c as char)),
        None => Err(BencodeError::UnexpectedEof),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }
    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let digits = std::str::from_utf8(&data[start..*pos])
        .map_err(|_| BencodeError::InvalidInteger("invalid utf8".into()))?;

    if digits.is_empty() {
        return Err(BencodeError::InvalidInteger("empty".into()));
    }
    if digits.starts_with("-0") || (digits.starts_with('0') && digits.len() > 1) {
        return Err(BencodeError::InvalidInteger("leading zeros".into()));
    }

    let value: i64 = digits
        .parse()
        .map_err(|_| BencodeError::InvalidInteger(digits.into()))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let start = *pos;
    while *pos < data.len() && data[*pos] != b':' {
        *pos += 1;
    }
    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let len: usize = std::str::from_utf8(&data[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidStringLength)?;

    *pos += 1;
    if len > data.len() - *pos {
        return Err(BencodeError::UnexpectedEof);
    }

    let bytes = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;
    Ok(Value::Bytes(bytes))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }
    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    while *pos < data.len() && data[*pos] != b'e' {
        let key = match decode_value(data, pos, depth + 1)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::UnexpectedChar('d')),
        };
        let value = decode_value(data, pos, depth + 1)?;
        dict.insert(key, value);
    }
    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}

/// Encodes a bencode value to a byte vector in canonical form.
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut buf = Vec::new();
    encode_value(value, &mut buf)?;
    Ok(buf)
}

fn encode_value<W: Write>(value: &Value, writer: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => {
            write!(writer, "i{}e", i)?;
        }
        Value::Bytes(b) => {
            write!(writer, "{}:", b.len())?;
            writer.write_all(b)?;
        }
        Value::List(l) => {
            writer.write_all(b"l")?;
            for item in l {
                encode_value(item, writer)?;
            }
            writer.write_all(b"e")?;
        }
        Value::Dict(d) => {
            writer.write_all(b"d")?;
            for (key, val) in d {
                write!(writer, "{}:", key.len())?;
                writer.write_all(key)?;
                encode_value(val, writer)?;
            }
            writer.write_all(b"e")?;
        }
    }
    Ok(())
}
