//! CBOR encoding and decoding for CTAP messages using cbor4ii
//!
//! CTAP2 parameter and response maps are keyed by small integers and must be
//! encoded canonically (CTAP2 canonical CBOR): integer keys sorted by their
//! encoded form, so `1, 2, .., 23, -1, -2, ..`.

use crate::status::{Result, StatusCode};

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// Dynamic CBOR value
pub type Value = cbor4ii::core::Value;

/// Maximum CTAP message size in bytes
pub const MAX_CTAP_MESSAGE_SIZE: usize = 7609;

/// Encode a value to CBOR bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let bytes = cbor4ii::serde::to_vec(Vec::new(), value).map_err(|_| StatusCode::InvalidCbor)?;
    if bytes.len() > MAX_CTAP_MESSAGE_SIZE {
        return Err(StatusCode::RequestTooLarge);
    }
    Ok(bytes)
}

/// Decode CBOR bytes to a value
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    cbor4ii::serde::from_slice(data).map_err(|_| StatusCode::InvalidCbor)
}

/// Convert a value to a dynamic CBOR value
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    decode(&encode(value)?)
}

/// Convert a dynamic CBOR value to a typed value
pub fn from_value<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T> {
    decode(&encode(value)?)
}

/// Length in bytes of the first complete CBOR data item in `data`
///
/// Authenticator data embeds CBOR items (credential public key, extensions)
/// back to back without any length prefix, so their extent has to be walked.
/// Only definite-length items are accepted, as CTAP2 canonical CBOR requires.
pub fn item_length(data: &[u8]) -> Result<usize> {
    fn walk(data: &[u8], pos: usize, depth: usize) -> Result<usize> {
        if depth > 16 {
            return Err(StatusCode::InvalidCbor);
        }
        let initial = *data.get(pos).ok_or(StatusCode::InvalidCbor)?;
        let major = initial >> 5;
        let info = initial & 0x1F;

        let (arg, mut next) = match info {
            0..=23 => (info as u64, pos + 1),
            24..=27 => {
                let size = 1usize << (info - 24);
                let bytes = data
                    .get(pos + 1..pos + 1 + size)
                    .ok_or(StatusCode::InvalidCbor)?;
                let arg = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
                (arg, pos + 1 + size)
            }
            _ => return Err(StatusCode::InvalidCbor),
        };

        match major {
            // unsigned, negative, simple/float
            0 | 1 | 7 => {}
            // byte and text strings
            2 | 3 => {
                next = next
                    .checked_add(usize::try_from(arg).map_err(|_| StatusCode::InvalidCbor)?)
                    .ok_or(StatusCode::InvalidCbor)?;
            }
            4 | 5 => {
                let items = if major == 5 { arg.saturating_mul(2) } else { arg };
                for _ in 0..items {
                    next = walk(data, next, depth + 1)?;
                }
            }
            // tag: one nested item
            _ => next = walk(data, next, depth + 1)?,
        }

        if next > data.len() {
            return Err(StatusCode::InvalidCbor);
        }
        Ok(next)
    }

    walk(data, 0, 0)
}

/// Integer map key ordered by its CBOR encoding
///
/// Non-negative keys come first in ascending order, then negative keys by
/// ascending absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CanonicalKey(i32);

impl Ord for CanonicalKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        let rank = |k: i32| if k >= 0 { (0, k as i64) } else { (1, -(k as i64)) };
        rank(self.0).cmp(&rank(other.0))
    }
}

impl PartialOrd for CanonicalKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Build a CBOR map with integer keys in canonical order
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: BTreeMap<CanonicalKey, Vec<u8>>,
}

impl MapBuilder {
    /// Create a new map builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an integer key and value
    pub fn insert<T: Serialize>(mut self, key: i32, value: T) -> Result<Self> {
        self.entries.insert(CanonicalKey(key), encode(&value)?);
        Ok(self)
    }

    /// Insert an optional value (only if Some)
    pub fn insert_opt<T: Serialize>(self, key: i32, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    /// Insert bytes encoded as a CBOR byte string
    pub fn insert_bytes(self, key: i32, bytes: &[u8]) -> Result<Self> {
        self.insert(key, serde_bytes::Bytes::new(bytes))
    }

    /// Insert a non-empty list; an empty list leaves the key out
    pub fn insert_list<T: Serialize>(self, key: i32, list: &[T]) -> Result<Self> {
        if list.is_empty() {
            Ok(self)
        } else {
            self.insert(key, list)
        }
    }

    /// Encode the map
    pub fn build(self) -> Result<Vec<u8>> {
        let len = self.entries.len();
        let mut out = Vec::new();

        // Map header (major type 5)
        match len {
            0..=23 => out.push(0xA0 | len as u8),
            24..=255 => out.extend_from_slice(&[0xB8, len as u8]),
            _ => return Err(StatusCode::InvalidCbor),
        }

        for (key, value) in self.entries {
            out.extend_from_slice(&encode(&key.0)?);
            out.extend_from_slice(&value);
        }

        if out.len() > MAX_CTAP_MESSAGE_SIZE {
            return Err(StatusCode::RequestTooLarge);
        }
        Ok(out)
    }
}

/// Parse a CBOR map with integer keys
///
/// Values are kept encoded and decoded on demand to their requested type.
pub struct MapParser {
    map: BTreeMap<i32, Vec<u8>>,
}

impl MapParser {
    /// Parse from CBOR bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let raw: BTreeMap<i32, Value> = decode(data)?;

        let mut map = BTreeMap::new();
        for (key, value) in raw {
            map.insert(key, encode(&value)?);
        }
        Ok(Self { map })
    }

    /// Get a required value by key
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: i32) -> Result<T> {
        let bytes = self.map.get(&key).ok_or(StatusCode::MissingParameter)?;
        decode(bytes)
    }

    /// Get an optional value by key
    pub fn get_opt<T: for<'de> Deserialize<'de>>(&self, key: i32) -> Result<Option<T>> {
        self.map.get(&key).map(|bytes| decode(bytes)).transpose()
    }

    /// Get a required byte string
    pub fn get_bytes(&self, key: i32) -> Result<Vec<u8>> {
        let buf: serde_bytes::ByteBuf = self.get(key)?;
        Ok(buf.into_vec())
    }

    /// Get an optional byte string
    pub fn get_bytes_opt(&self, key: i32) -> Result<Option<Vec<u8>>> {
        let buf: Option<serde_bytes::ByteBuf> = self.get_opt(key)?;
        Ok(buf.map(serde_bytes::ByteBuf::into_vec))
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: i32) -> bool {
        self.map.contains_key(&key)
    }

    /// Keys present in the map, in ascending order
    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.map.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::string::String;
    use alloc::vec;

    #[test]
    fn test_encode_decode_string() {
        let encoded = encode(&"Hello, CTAP!").unwrap();
        let decoded: String = decode(&encoded).unwrap();
        assert_eq!(decoded, "Hello, CTAP!");
    }

    #[test]
    fn test_invalid_cbor() {
        let result: Result<String> = decode(&[0xff, 0xff, 0xff]);
        assert_eq!(result.unwrap_err(), StatusCode::InvalidCbor);
    }

    #[test]
    fn test_canonical_key_order() {
        let cbor = MapBuilder::new()
            .insert(-2, 0)
            .unwrap()
            .insert(3, 0)
            .unwrap()
            .insert(-1, 0)
            .unwrap()
            .insert(1, 0)
            .unwrap()
            .build()
            .unwrap();

        // {1: 0, 3: 0, -1: 0, -2: 0}
        assert_eq!(cbor, vec![0xA4, 0x01, 0x00, 0x03, 0x00, 0x20, 0x00, 0x21, 0x00]);
    }

    #[test]
    fn test_map_builder_and_parser() {
        let cbor = MapBuilder::new()
            .insert(1, "test")
            .unwrap()
            .insert(2, 42i32)
            .unwrap()
            .insert_bytes(3, &[1, 2, 3])
            .unwrap()
            .insert_opt::<i32>(4, None)
            .unwrap()
            .build()
            .unwrap();

        let parser = MapParser::from_bytes(&cbor).unwrap();
        let s: String = parser.get(1).unwrap();
        let i: i32 = parser.get(2).unwrap();

        assert_eq!(s, "test");
        assert_eq!(i, 42);
        assert_eq!(parser.get_bytes(3).unwrap(), vec![1, 2, 3]);
        assert!(!parser.contains_key(4));
        assert_eq!(parser.keys().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_list_skips_empty() {
        let empty: [i32; 0] = [];
        let cbor = MapBuilder::new()
            .insert_list(5, &empty)
            .unwrap()
            .insert_list(6, &[1, 2])
            .unwrap()
            .build()
            .unwrap();

        let parser = MapParser::from_bytes(&cbor).unwrap();
        assert!(!parser.contains_key(5));
        assert_eq!(parser.get::<Vec<i32>>(6).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let cbor = MapBuilder::new().insert(1, "test").unwrap().build().unwrap();
        let parser = MapParser::from_bytes(&cbor).unwrap();

        assert_eq!(parser.get::<String>(99).unwrap_err(), StatusCode::MissingParameter);
        assert_eq!(parser.get_opt::<String>(99).unwrap(), None);
        assert_eq!(parser.get_bytes_opt(99).unwrap(), None);
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let cbor = MapBuilder::new().insert(1, "text").unwrap().build().unwrap();
        let parser = MapParser::from_bytes(&cbor).unwrap();

        assert!(parser.get::<i32>(1).is_err());
    }

    #[test]
    fn test_item_length_stops_at_first_item() {
        let first = MapBuilder::new()
            .insert(1, 2)
            .unwrap()
            .insert_bytes(-2, &[7; 32])
            .unwrap()
            .build()
            .unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&encode(&"trailing").unwrap());

        assert_eq!(item_length(&data).unwrap(), first.len());
    }

    #[test]
    fn test_item_length_rejects_truncated() {
        let item = encode(&serde_bytes::Bytes::new(&[1, 2, 3, 4])).unwrap();
        assert_eq!(
            item_length(&item[..item.len() - 1]).unwrap_err(),
            StatusCode::InvalidCbor
        );
        assert_eq!(item_length(&[]).unwrap_err(), StatusCode::InvalidCbor);
        // indefinite-length byte string
        assert_eq!(item_length(&[0x5F]).unwrap_err(), StatusCode::InvalidCbor);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let big = vec![0u8; MAX_CTAP_MESSAGE_SIZE];
        assert_eq!(
            MapBuilder::new().insert_bytes(1, &big).unwrap_err(),
            StatusCode::RequestTooLarge
        );
    }
}
