//! Crypto engine configuration.
//!
//! The engine's ciphertext envelopes are described as data rather than
//! hard-coded, because the engine can introduce new envelope formats
//! independently of this client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the remote crypto engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine URL used until the Hub delivers endpoint info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Prefixed envelope formats recognised as ciphertext.
    #[serde(default = "default_envelopes")]
    pub envelopes: Vec<EnvelopeScheme>,

    /// Shape of legacy, unprefixed ciphertext.
    #[serde(default)]
    pub legacy: LegacyEnvelope,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_url: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            envelopes: default_envelopes(),
            legacy: LegacyEnvelope::default(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// A versioned, prefixed envelope: `prefix:policyId:base64(payload)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeScheme {
    /// Scheme tag before the first `:`.
    pub prefix: String,

    /// Minimum decoded payload length (iv + tag + at least one byte).
    pub min_decoded_len: usize,

    /// Maximum length of the policy identifier segment.
    #[serde(default = "default_max_id_len")]
    pub max_id_len: usize,

    /// Whether the payload uses the URL-safe base64 alphabet.
    #[serde(default)]
    pub url_safe: bool,
}

impl EnvelopeScheme {
    pub fn new(prefix: impl Into<String>, min_decoded_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            min_decoded_len,
            max_id_len: default_max_id_len(),
            url_safe: false,
        }
    }
}

/// Legacy ciphertext: `base64(policyId padded to id_width || payload)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEnvelope {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Width in bytes of the leading identifier segment.
    #[serde(default = "default_legacy_id_width")]
    pub id_width: usize,

    /// Minimum decoded length including the identifier segment.
    #[serde(default = "default_legacy_min_len")]
    pub min_decoded_len: usize,
}

impl Default for LegacyEnvelope {
    fn default() -> Self {
        Self {
            enabled: true,
            id_width: default_legacy_id_width(),
            min_decoded_len: default_legacy_min_len(),
        }
    }
}

fn default_envelopes() -> Vec<EnvelopeScheme> {
    vec![
        // AES-GCM: 12-byte IV, 16-byte tag.
        EnvelopeScheme::new("gcm", 29),
        // AES-SIV (deterministic): 16-byte synthetic IV.
        EnvelopeScheme::new("siv", 17),
        // AES-CBC + HMAC: 16-byte IV, one block, 32-byte MAC.
        EnvelopeScheme::new("cbc", 64),
        // ChaCha20-Poly1305: 12-byte nonce, 16-byte tag.
        EnvelopeScheme::new("ccp", 29),
    ]
}

fn default_true() -> bool {
    true
}

fn default_max_id_len() -> usize {
    64
}

fn default_legacy_id_width() -> usize {
    16
}

fn default_legacy_min_len() -> usize {
    // id segment + 12-byte IV + 16-byte tag + 1 byte
    16 + 12 + 16 + 1
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_read_timeout_ms() -> u64 {
    5000
}
