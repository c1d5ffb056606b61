//! Canonical CBOR encoding for deterministic serialization.
//!
//! Records are encoded as CBOR (RFC 8949) under a restricted profile:
//! - Map keys are text, sorted by their encoded bytes, never duplicated
//! - Integer values always use the 8-byte argument (one width for every value)
//! - Lengths (strings, arrays, maps) use the shortest argument
//! - Definite lengths only
//! - No floats, tags, null, or other simple values; absent fields are omitted
//!
//! Decoding is strict: the input must re-encode to exactly the same bytes,
//! so every logical value has a single accepted encoding.
//!
//! **CRITICAL**: This encoding is FROZEN. Changes break every existing CID
//! and signature.

use ciborium::value::Integer;
pub use ciborium::value::Value;

use crate::error::{CoreError, Result};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;

/// Additional-info value selecting an 8-byte argument.
const ARG_8_BYTES: u8 = 27;

/// A record with a canonical CBOR form.
pub trait Canonical {
    /// Build the CBOR value for this record.
    fn to_cbor(&self) -> Value;

    /// Encode to canonical bytes.
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        encode(&self.to_cbor())
    }
}

/// Encode a CBOR value to canonical bytes.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_value(&mut buf, value)?;
    Ok(buf)
}

/// Decode canonical bytes into a CBOR value.
///
/// Rejects malformed input, trailing bytes, and any encoding that differs
/// from the canonical one (unsorted keys, short integers, indefinite
/// lengths, floats, tags).
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let value: Value = ciborium::de::from_reader(bytes)
        .map_err(|e| CoreError::encoding(format!("malformed cbor: {e}")))?;

    let reencoded = encode(&value)?;
    if reencoded.as_slice() != bytes {
        return Err(CoreError::encoding("input is not in canonical form"));
    }
    Ok(value)
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_length(buf, MAJOR_BYTES, b.len());
            buf.extend_from_slice(b);
        }
        Value::Text(s) => encode_text(buf, s),
        Value::Array(items) => {
            encode_length(buf, MAJOR_ARRAY, items.len());
            for item in items {
                encode_value(buf, item)?;
            }
        }
        Value::Map(entries) => encode_map(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Float(_) => return Err(CoreError::encoding("floats are not canonical")),
        Value::Null => {
            return Err(CoreError::encoding(
                "null is not canonical; omit absent fields",
            ))
        }
        Value::Tag(tag, _) => {
            return Err(CoreError::encoding(format!("tag {tag} is not canonical")))
        }
        _ => return Err(CoreError::encoding("unsupported cbor value")),
    }
    Ok(())
}

/// Integer values: fixed 8-byte argument regardless of magnitude.
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_fixed(buf, MAJOR_UNSIGNED, n as u64);
    } else {
        // -1 encodes as 0, -2 as 1, ...
        encode_fixed(buf, MAJOR_NEGATIVE, (-1 - n) as u64);
    }
}

fn encode_fixed(buf: &mut Vec<u8>, major: u8, n: u64) {
    buf.push((major << 5) | ARG_8_BYTES);
    buf.extend_from_slice(&n.to_be_bytes());
}

/// Lengths: shortest argument.
fn encode_length(buf: &mut Vec<u8>, major: u8, len: usize) {
    let mt = major << 5;
    let n = len as u64;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | ARG_8_BYTES);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_length(buf, MAJOR_TEXT, s.len());
    buf.extend_from_slice(s.as_bytes());
}

fn encode_map(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<()> {
    let mut sorted = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let key = match k {
            Value::Text(s) => s,
            _ => return Err(CoreError::encoding("map keys must be text")),
        };
        let mut key_bytes = Vec::with_capacity(key.len() + 1);
        encode_text(&mut key_bytes, key);
        sorted.push((key_bytes, v));
    }

    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    if sorted.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(CoreError::encoding("duplicate map key"));
    }

    encode_length(buf, MAJOR_MAP, sorted.len());
    for (key_bytes, value) in sorted {
        buf.extend_from_slice(&key_bytes);
        encode_value(buf, value)?;
    }
    Ok(())
}

/// Builds a text-keyed map, dropping absent optional fields.
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries
            .push((Value::Text(key.into()), Value::Text(value.into())));
        self
    }

    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.entries
            .push((Value::Text(key.into()), Value::Integer(value.into())));
        self
    }

    pub fn bytes(mut self, key: &str, value: &[u8]) -> Self {
        self.entries
            .push((Value::Text(key.into()), Value::Bytes(value.to_vec())));
        self
    }

    pub fn value(mut self, key: &str, value: Value) -> Self {
        self.entries.push((Value::Text(key.into()), value));
        self
    }

    pub fn opt_text(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.text(key, v),
            None => self,
        }
    }

    pub fn opt_int(self, key: &str, value: Option<i64>) -> Self {
        match value {
            Some(v) => self.int(key, v),
            None => self,
        }
    }

    pub fn opt_bytes(self, key: &str, value: Option<&[u8]>) -> Self {
        match value {
            Some(v) => self.bytes(key, v),
            None => self,
        }
    }

    /// Add an array, omitting it when empty.
    ///
    /// An empty list and a missing list are the same logical value, so only
    /// one of them may appear on the wire.
    pub fn array(mut self, key: &str, items: Vec<Value>) -> Self {
        if !items.is_empty() {
            self.entries
                .push((Value::Text(key.into()), Value::Array(items)));
        }
        self
    }

    pub fn build(self) -> Value {
        Value::Map(self.entries)
    }
}

/// Reads typed fields out of a decoded text-keyed map.
///
/// Call [`MapReader::finish`] once every known field has been read; it
/// rejects maps carrying keys nobody asked for.
#[derive(Debug)]
pub struct MapReader<'a> {
    what: &'static str,
    entries: &'a [(Value, Value)],
    consumed: usize,
}

impl<'a> MapReader<'a> {
    pub fn new(what: &'static str, value: &'a Value) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self {
                what,
                entries,
                consumed: 0,
            }),
            _ => Err(CoreError::encoding(format!("{what}: expected map"))),
        }
    }

    fn get(&mut self, key: &str) -> Option<&'a Value> {
        let found = self
            .entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
            .map(|(_, v)| v);
        if found.is_some() {
            self.consumed += 1;
        }
        found
    }

    fn missing(&self, key: &str) -> CoreError {
        CoreError::encoding(format!("{}: missing field {key}", self.what))
    }

    fn invalid(&self, key: &str) -> CoreError {
        CoreError::encoding(format!("{}: invalid field {key}", self.what))
    }

    pub fn opt_text(&mut self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(key)),
        }
    }

    pub fn text(&mut self, key: &str) -> Result<String> {
        self.opt_text(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_int(&mut self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Integer(i)) => i64::try_from(*i)
                .map(Some)
                .map_err(|_| self.invalid(key)),
            Some(_) => Err(self.invalid(key)),
        }
    }

    pub fn int(&mut self, key: &str) -> Result<i64> {
        self.opt_int(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_bytes(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bytes(b)) => Ok(Some(b.clone())),
            Some(_) => Err(self.invalid(key)),
        }
    }

    pub fn bytes(&mut self, key: &str) -> Result<Vec<u8>> {
        self.opt_bytes(key)?.ok_or_else(|| self.missing(key))
    }

    /// Read a fixed-size byte field.
    pub fn byte_array<const N: usize>(&mut self, key: &str) -> Result<[u8; N]> {
        let bytes = self.bytes(key)?;
        bytes.try_into().map_err(|_| self.invalid(key))
    }

    pub fn opt_value(&mut self, key: &str) -> Option<&'a Value> {
        self.get(key)
    }

    pub fn value(&mut self, key: &str) -> Result<&'a Value> {
        self.get(key).ok_or_else(|| self.missing(key))
    }

    /// Read an array written by [`MapBuilder::array`].
    ///
    /// A present-but-empty array is rejected; it has no canonical form.
    pub fn array(&mut self, key: &str) -> Result<&'a [Value]> {
        match self.get(key) {
            None => Ok(&[]),
            Some(Value::Array(items)) if !items.is_empty() => Ok(items),
            Some(_) => Err(self.invalid(key)),
        }
    }

    pub fn text_array(&mut self, key: &str) -> Result<Vec<String>> {
        self.array(key)?
            .iter()
            .map(|v| match v {
                Value::Text(s) => Ok(s.clone()),
                _ => Err(self.invalid(key)),
            })
            .collect()
    }

    pub fn bytes_array(&mut self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.array(key)?
            .iter()
            .map(|v| match v {
                Value::Bytes(b) => Ok(b.clone()),
                _ => Err(self.invalid(key)),
            })
            .collect()
    }

    /// Fail if the map held keys that were never read.
    pub fn finish(self) -> Result<()> {
        if self.consumed != self.entries.len() {
            return Err(CoreError::encoding(format!(
                "{}: unknown fields present",
                self.what
            )));
        }
        Ok(())
    }
}
