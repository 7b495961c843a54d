//! Token orchestration.
//!
//! 1. Serialize the field map for the request.
//! 2. Seed the random-number cache from the timestamp.
//! 3. Draw 12 key words, then the insertion offset, then the round count.
//! 4. Encrypt the payload with the keystream cipher.
//!
//! The ciphertext is the token. [`Token::encode`] additionally applies the
//! production wire framing: a `'K'` marker, the key bytes spliced into the
//! ciphertext at the insertion offset, and a custom 64-symbol alphabet.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::alphabet::Alphabet;
use base64::engine::{GeneralPurpose, general_purpose};
use serde::Deserialize;
use tracing::debug;

use crate::cipher::{KeySchedule, KeystreamCipher, draw_rounds};
use crate::double_cache::DoubleCache;
use crate::error::TokenError;
use crate::payload::{EXTENDED_VERSION, PayloadFields, SerializedPayload};

/// Version used when the request leaves it empty.
pub const DEFAULT_VERSION: &str = EXTENDED_VERSION;

/// First byte of the framed token (`'K'`).
const WIRE_MARKER: u8 = (1 << 6) ^ (1 << 3) ^ 3;

const WIRE_ALPHABET: Alphabet =
    match Alphabet::new("u09tbS3UvgDEe6r-ZVMXzLpsAohTn7mdINQlW412GqBjfYiyk8JORCF5/xKHwacP") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("wire alphabet must be 64 unique printable symbols"),
    };

const WIRE_ENGINE: GeneralPurpose = GeneralPurpose::new(&WIRE_ALPHABET, general_purpose::NO_PAD);

/// Inputs of one token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    /// Form-encoded query string, exactly as sent.
    pub query: String,
    /// Request body, empty for GET.
    pub body: String,
    pub user_agent: String,
    /// Environment/channel code, usually 0.
    pub env_code: u32,
    /// Version tag; `"5.1.1"` adds tags 10..=12.
    pub version: String,
    /// Millisecond timestamp. `None` means now.
    pub timestamp_ms: Option<u64>,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            body: String::new(),
            user_agent: String::new(),
            env_code: 0,
            version: DEFAULT_VERSION.to_string(),
            timestamp_ms: None,
        }
    }
}

impl TokenRequest {
    pub fn new(
        query: impl Into<String>,
        body: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            body: body.into(),
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    /// Build a request from raw bytes, rejecting anything that is not UTF-8.
    pub fn from_raw(query: &[u8], body: &[u8], user_agent: &[u8]) -> Result<Self, TokenError> {
        Ok(Self::new(
            decode_field("query", query)?,
            decode_field("body", body)?,
            decode_field("user_agent", user_agent)?,
        ))
    }

    pub fn with_env_code(mut self, env_code: u32) -> Self {
        self.env_code = env_code;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    fn effective_version(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.version
        }
    }
}

fn decode_field(field: &'static str, raw: &[u8]) -> Result<String, TokenError> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|source| TokenError::InputEncoding { field, source })
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Result<u64, TokenError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64)
}

/// A generated token with the intermediate values that produced it.
#[derive(Debug, Clone)]
pub struct Token {
    timestamp_ms: u64,
    payload: SerializedPayload,
    key: KeySchedule,
    insert_offset: usize,
    rounds: usize,
    ciphertext: Vec<u8>,
}

impl Token {
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// The plaintext payload that was encrypted.
    pub fn payload(&self) -> &SerializedPayload {
        &self.payload
    }

    pub fn key(&self) -> &KeySchedule {
        &self.key
    }

    pub fn key_bytes(&self) -> [u8; 48] {
        self.key.to_le_bytes()
    }

    /// Always in `0..=ciphertext().len()`.
    pub fn insert_offset(&self) -> usize {
        self.insert_offset
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// The opaque token bytes.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn ciphertext_hex(&self) -> String {
        self.ciphertext.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.ciphertext
    }

    /// `'K' ‖ ciphertext[..offset] ‖ key bytes ‖ ciphertext[offset..]`.
    pub fn framed(&self) -> Vec<u8> {
        let (head, tail) = self.ciphertext.split_at(self.insert_offset);
        let key_bytes = self.key_bytes();
        let mut out = Vec::with_capacity(1 + self.ciphertext.len() + key_bytes.len());
        out.push(WIRE_MARKER);
        out.extend_from_slice(head);
        out.extend_from_slice(&key_bytes);
        out.extend_from_slice(tail);
        out
    }

    /// Framed token in the wire alphabet. The caller still percent-encodes
    /// it when placing it in a URL.
    pub fn encode(&self) -> String {
        wire_encode(&self.framed())
    }
}

/// 3 bytes to 4 symbols; a trailing group of 1 or 2 bytes is dropped.
fn wire_encode(bytes: &[u8]) -> String {
    let whole = bytes.len() / 3 * 3;
    WIRE_ENGINE.encode(&bytes[..whole])
}

/// Generate a token for `request`.
pub fn build_token(request: &TokenRequest) -> Result<Token, TokenError> {
    let timestamp_ms = match request.timestamp_ms {
        Some(ts) => ts,
        None => now_ms()?,
    };

    let payload = PayloadFields {
        query: &request.query,
        body: &request.body,
        user_agent: &request.user_agent,
        env_code: request.env_code,
        version: request.effective_version(),
        timestamp_ms,
    }
    .serialize()?;

    let mut cache = DoubleCache::new(timestamp_ms);
    let key = KeySchedule::draw(&mut cache);
    let insert_offset = cache.below(payload.len() + 1);
    let rounds = draw_rounds(&mut cache);
    debug!(
        timestamp_ms,
        payload_len = payload.len(),
        insert_offset,
        rounds,
        "drew token key schedule"
    );

    let ciphertext = KeystreamCipher::new(&key, rounds).apply(payload.as_bytes());

    Ok(Token {
        timestamp_ms,
        payload,
        key,
        insert_offset,
        rounds,
        ciphertext,
    })
}
