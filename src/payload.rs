//! Tagged field map and its length-prefixed serialization.
//!
//! Field layout (tag: value):
//!
//! | tag | value                                             |
//! |-----|---------------------------------------------------|
//! | 1   | `1`                                               |
//! | 2   | environment code                                  |
//! | 3   | md5 hex of the query string                       |
//! | 4   | md5 hex of the body                               |
//! | 5   | md5 hex of the user agent                         |
//! | 6   | epoch seconds                                     |
//! | 7   | protocol constant `1508145731`                    |
//! | 8   | `(timestamp_ms * 1000) mod 2^31`                  |
//! | 9   | version string                                    |
//! | 10  | SDK version `"1.0.0.314"` (version 5.1.1 only)    |
//! | 11  | `1` (version 5.1.1 only)                          |
//! | 12  | XOR of tags 1..=11 (version 5.1.1 only)           |
//! | 0   | XOR of every numeric value, always last           |
//!
//! Serialized as `count, (tag, len, value)*`. Lengths and numeric values are
//! big-endian, 2 bytes below `255 * 255` and 4 bytes from there up.

use md5::{Digest, Md5};

use crate::error::TokenError;

/// Lengths below this use a 2-byte prefix.
pub const LENGTH_WIDE_THRESHOLD: u32 = 255 * 255;

/// Numeric values below this are written in 2 bytes.
pub const NUMBER_WIDE_THRESHOLD: u32 = 255 * 255;

/// Version string that enables tags 10..=12.
pub const EXTENDED_VERSION: &str = "5.1.1";

const PROTOCOL_MAGIC: u32 = 1_508_145_731;
const SDK_VERSION: &str = "1.0.0.314";

/// A field value: a 32-bit number or a short text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Numeric(u32),
    Text(String),
}

impl FieldValue {
    pub fn as_numeric(&self) -> Option<u32> {
        match self {
            FieldValue::Numeric(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Contribution to the tag 12 checksum: the number itself, or the first
    /// four UTF-8 bytes of the text read big-endian.
    pub fn checksum_word(&self) -> u32 {
        match self {
            FieldValue::Numeric(n) => *n,
            FieldValue::Text(s) => s
                .as_bytes()
                .iter()
                .take(4)
                .fold(0u32, |acc, b| (acc << 8) | *b as u32),
        }
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Numeric(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// Insertion-ordered map from tag to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: Vec<(u8, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `tag`. A new tag goes to the end; an existing tag keeps its position.
    pub fn set(&mut self, tag: u8, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((tag, value)),
        }
    }

    pub fn get(&self, tag: u8) -> Option<&FieldValue> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &FieldValue)> {
        self.fields.iter().map(|(t, v)| (*t, v))
    }

    /// XOR of `checksum_word` over the given tags; missing tags are skipped.
    pub fn checksum(&self, tags: impl IntoIterator<Item = u8>) -> u32 {
        tags.into_iter()
            .filter_map(|tag| self.get(tag))
            .fold(0, |acc, v| acc ^ v.checksum_word())
    }

    /// XOR of every numeric value except tag 0.
    pub fn numeric_checksum(&self) -> u32 {
        self.iter()
            .filter(|(tag, _)| *tag != 0)
            .filter_map(|(_, v)| v.as_numeric())
            .fold(0, |acc, n| acc ^ n)
    }

    pub fn serialize(&self) -> Result<SerializedPayload, TokenError> {
        let count = u8::try_from(self.len()).map_err(|_| TokenError::TooManyFields(self.len()))?;

        let mut out = Vec::with_capacity(1 + self.len() * 8);
        out.push(count);
        for (tag, value) in self.iter() {
            out.push(tag);
            match value {
                FieldValue::Numeric(n) => {
                    let mut bytes = Vec::with_capacity(4);
                    push_number(&mut bytes, *n);
                    push_length(&mut out, bytes.len() as u32);
                    out.extend_from_slice(&bytes);
                }
                FieldValue::Text(s) => {
                    let len = u32::try_from(s.len())
                        .map_err(|_| TokenError::FieldTooLarge { tag, len: s.len() })?;
                    push_length(&mut out, len);
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        Ok(SerializedPayload(out))
    }
}

fn push_be(out: &mut Vec<u8>, value: u32, wide_threshold: u32) {
    if value < wide_threshold {
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn push_length(out: &mut Vec<u8>, len: u32) {
    push_be(out, len, LENGTH_WIDE_THRESHOLD);
}

fn push_number(out: &mut Vec<u8>, value: u32) {
    push_be(out, value, NUMBER_WIDE_THRESHOLD);
}

/// Serialized field map, ready for the keystream cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedPayload(Vec<u8>);

impl SerializedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Lowercase hex md5 digest.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// The caller-supplied inputs of the field map.
#[derive(Debug, Clone, Copy)]
pub struct PayloadFields<'a> {
    pub query: &'a str,
    pub body: &'a str,
    pub user_agent: &'a str,
    pub env_code: u32,
    pub version: &'a str,
    pub timestamp_ms: u64,
}

impl PayloadFields<'_> {
    /// Build the field map, checksums included.
    pub fn field_map(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.set(1, 1u32);
        map.set(2, self.env_code);
        map.set(3, md5_hex(self.query.as_bytes()));
        map.set(4, md5_hex(self.body.as_bytes()));
        map.set(5, md5_hex(self.user_agent.as_bytes()));
        map.set(6, (self.timestamp_ms / 1000) as u32);
        map.set(7, PROTOCOL_MAGIC);
        // 2^31 divides 2^64, so the wrapped product reduces to the exact value.
        map.set(8, (self.timestamp_ms.wrapping_mul(1000) & 0x7fff_ffff) as u32);
        map.set(9, self.version);

        if self.version == EXTENDED_VERSION {
            map.set(10, SDK_VERSION);
            map.set(11, 1u32);
            let v12 = map.checksum(1..=11);
            map.set(12, v12);
        }

        let v0 = map.numeric_checksum();
        map.set(0, v0);
        map
    }

    pub fn serialize(&self) -> Result<SerializedPayload, TokenError> {
        self.field_map().serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(version: &str) -> PayloadFields<'_> {
        PayloadFields {
            query: "aid=1988&count=20",
            body: "",
            user_agent: "Mozilla/5.0",
            env_code: 0,
            version,
            timestamp_ms: 1767083930000,
        }
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"Mozilla/5.0"), "0e3c1d553071f45ae73c51aa46fc11d8");
    }

    #[test]
    fn test_tag_order_extended() {
        let map = fields("5.1.1").field_map();
        let tags: Vec<u8> = map.iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 0]);
    }

    #[test]
    fn test_tag_order_short() {
        let map = fields("5.1.0").field_map();
        let tags: Vec<u8> = map.iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
        assert_eq!(map.get(0), Some(&FieldValue::Numeric(2035838808)));
    }

    #[test]
    fn test_timestamp_fields() {
        let map = fields("5.1.1").field_map();
        assert_eq!(map.get(6), Some(&FieldValue::Numeric(1767083930)));
        assert_eq!(map.get(8), Some(&FieldValue::Numeric(1240439424)));
    }

    #[test]
    fn test_checksum_fields() {
        let map = fields("5.1.1").field_map();

        let mut v12 = 0u32;
        for tag in 1..=11 {
            v12 ^= match map.get(tag).unwrap() {
                FieldValue::Numeric(n) => *n,
                FieldValue::Text(s) => {
                    let mut word = [0u8; 4];
                    let head = &s.as_bytes()[..s.len().min(4)];
                    word[4 - head.len()..].copy_from_slice(head);
                    u32::from_be_bytes(word)
                }
            };
        }
        assert_eq!(map.get(12), Some(&FieldValue::Numeric(v12)));

        let v0 = [1, 2, 6, 7, 8, 11, 12]
            .iter()
            .map(|t| map.get(*t).unwrap().as_numeric().unwrap())
            .fold(0, |acc, n| acc ^ n);
        assert_eq!(map.get(0), Some(&FieldValue::Numeric(v0)));
    }

    #[test]
    fn test_short_text_checksum_word() {
        assert_eq!(FieldValue::from("5.1").checksum_word(), 0x0035_2e31);
        assert_eq!(FieldValue::from("").checksum_word(), 0);
        assert_eq!(FieldValue::from("5.1.1").checksum_word(), 0x352e_312e);
    }

    #[test]
    fn test_serialized_short_layout() {
        let payload = fields("5.1.0").serialize().unwrap();
        assert_eq!(
            hex(payload.as_bytes()),
            "0a0100020001020002000003002063396533393237343162326661633335393663633436313437336438613036610400206434316438636439386630306232303465393830303939386563663834323765050020306533633164353533303731663435616537336335316161343666633131643806000469538f9a07000459e47a4308000449ef9a80090005352e312e3000000479586f58"
        );
    }

    #[test]
    fn test_width_threshold_boundary() {
        let mut out = Vec::new();
        push_number(&mut out, 255 * 255 - 1);
        assert_eq!(out, vec![0xfe, 0x00]);

        out.clear();
        push_number(&mut out, 255 * 255);
        assert_eq!(out, vec![0x00, 0x00, 0xfe, 0x01]);

        out.clear();
        push_length(&mut out, 255 * 255);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_long_text_uses_wide_length() {
        let mut map = FieldMap::new();
        map.set(3, "x".repeat(255 * 255));
        let payload = map.serialize().unwrap();
        assert_eq!(&payload.as_bytes()[..6], &[1, 3, 0x00, 0x00, 0xfe, 0x01]);
        assert_eq!(payload.len(), 2 + 4 + 255 * 255);
    }

    #[test]
    fn test_set_keeps_position() {
        let mut map = FieldMap::new();
        map.set(1, 1u32);
        map.set(2, "a");
        map.set(1, 7u32);
        let fields: Vec<_> = map.iter().collect();
        assert_eq!(
            fields,
            vec![
                (1, &FieldValue::Numeric(7)),
                (2, &FieldValue::Text("a".to_string()))
            ]
        );
    }

    #[test]
    fn test_too_many_fields() {
        let mut map = FieldMap::new();
        for tag in 0..=255u8 {
            map.set(tag, 0u32);
        }
        assert_eq!(map.len(), 256);
        assert!(matches!(map.serialize(), Err(TokenError::TooManyFields(256))));
    }
}
