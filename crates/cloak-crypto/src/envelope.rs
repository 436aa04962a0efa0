//! Ciphertext envelope recognition.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use cloak_core::{EngineConfig, EnvelopeScheme, LegacyEnvelope};

/// Decides whether a stored value is engine ciphertext.
///
/// Recognised shapes:
/// - `scheme:policyId:payload` where `scheme` is one of the configured
///   prefixes, `policyId` is a short identifier and `payload` is base64 of
///   at least the scheme's minimum length (IV + tag + one byte).
/// - The legacy unprefixed form: base64 whose decoded bytes start with a
///   fixed-width identifier segment followed by the payload.
#[derive(Debug, Clone)]
pub struct EnvelopeDetector {
    schemes: Vec<EnvelopeScheme>,
    legacy: LegacyEnvelope,
}

impl Default for EnvelopeDetector {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl EnvelopeDetector {
    pub fn new(schemes: Vec<EnvelopeScheme>, legacy: LegacyEnvelope) -> Self {
        Self { schemes, legacy }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.envelopes.clone(), config.legacy.clone())
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        self.policy_id(value).is_some()
    }

    /// The policy identifier carried by an envelope, or `None` when the
    /// value is not recognised as ciphertext.
    pub fn policy_id(&self, value: &str) -> Option<String> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        self.prefixed_id(value)
            .map(str::to_string)
            .or_else(|| self.legacy_id(value))
    }

    /// The scheme prefix of a prefixed envelope, if any.
    pub fn scheme_of<'a>(&'a self, value: &str) -> Option<&'a EnvelopeScheme> {
        let mut parts = value.trim().splitn(3, ':');
        let prefix = parts.next()?;
        self.schemes
            .iter()
            .find(|s| s.prefix.eq_ignore_ascii_case(prefix))
    }

    fn prefixed_id<'v>(&self, value: &'v str) -> Option<&'v str> {
        let mut parts = value.splitn(3, ':');
        let (Some(prefix), Some(policy_id), Some(payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let scheme = self
            .schemes
            .iter()
            .find(|s| s.prefix.eq_ignore_ascii_case(prefix))?;

        if !is_identifier(policy_id, scheme.max_id_len) {
            return None;
        }

        let decoded = if scheme.url_safe {
            URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))
        } else {
            STANDARD.decode(payload)
        };
        decoded
            .is_ok_and(|bytes| bytes.len() >= scheme.min_decoded_len)
            .then_some(policy_id)
    }

    fn legacy_id(&self, value: &str) -> Option<String> {
        if !self.legacy.enabled || value.len() % 4 != 0 {
            return None;
        }
        let bytes = STANDARD.decode(value).ok()?;
        if bytes.len() < self.legacy.min_decoded_len || bytes.len() <= self.legacy.id_width {
            return None;
        }

        // Identifier segment: ASCII word characters, right-padded with NUL or space.
        let segment = &bytes[..self.legacy.id_width];
        let id_len = segment
            .iter()
            .position(|b| *b == 0 || *b == b' ')
            .unwrap_or(segment.len());
        let valid = id_len > 0
            && segment[..id_len]
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
            && segment[id_len..].iter().all(|b| *b == 0 || *b == b' ');
        valid.then(|| String::from_utf8_lossy(&segment[..id_len]).into_owned())
    }
}

fn is_identifier(id: &str, max_len: usize) -> bool {
    !id.is_empty()
        && id.len() <= max_len
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
