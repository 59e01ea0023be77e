//! Secret key decoding for encrypted metadata

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

pub const SECRET_KEY_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("The extracted key is {actual} bytes long, expected {expected}")]
    Length { expected: usize, actual: usize },
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SECRET_KEY_LENGTH]);

impl SecretKey {
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Decode a base64 key blob. The key is the trailing
/// [`SECRET_KEY_LENGTH`] bytes of the decoded material.
pub fn decode_key(encoded: &str) -> Result<SecretKey, KeyError> {
    let raw = STANDARD.decode(encoded.trim())?;
    let start = raw.len().saturating_sub(SECRET_KEY_LENGTH);
    let key: [u8; SECRET_KEY_LENGTH] = raw[start..].try_into().map_err(|_| KeyError::Length {
        expected: SECRET_KEY_LENGTH,
        actual: raw.len() - start,
    })?;
    Ok(SecretKey(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_trailing_bytes() {
        let mut material = b"header-bytes".to_vec();
        material.extend(0u8..32);
        let key = decode_key(&STANDARD.encode(&material)).unwrap();
        assert_eq!(key.as_bytes()[0], 0);
        assert_eq!(key.as_bytes()[31], 31);
    }

    #[test]
    fn test_short_key() {
        let err = decode_key(&STANDARD.encode([7u8; 16])).unwrap_err();
        assert!(matches!(err, KeyError::Length { expected: 32, actual: 16 }));
    }

    #[test]
    fn test_invalid_base64_and_redaction() {
        assert!(matches!(decode_key("not base64!"), Err(KeyError::Base64(_))));
        let key = decode_key(&STANDARD.encode([1u8; 32])).unwrap();
        assert_eq!(format!("{key:?}"), "SecretKey(<redacted>)");
    }
}
