//! Credential sealing
//!
//! Secret values in the credentials file may be stored sealed as
//! `enc:v1:<base64>`, where the payload is a random nonce followed by the
//! AES-256-GCM ciphertext and tag. The key comes from the environment: either
//! 64 hex characters used as the raw key, or a passphrase stretched with
//! PBKDF2-HMAC-SHA256.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;

pub const SEALED_PREFIX: &str = "enc:v1:";

/// Environment variable read when the configuration does not name another
pub const DEFAULT_MASTER_KEY_ENV: &str = "CFGVAULT_MASTER_KEY";

const KDF_SALT: &[u8] = b"cfgvault/credentials/v1";
const KDF_ITERATIONS: NonZeroU32 = match NonZeroU32::new(600_000) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};
const AAD: &[u8] = b"cfgvault-credential";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("master key is empty")]
    EmptyKey,

    #[error("master key rejected by cipher")]
    BadKey,

    #[error("sealed value is not valid base64")]
    Encoding,

    #[error("sealed value is truncated")]
    Truncated,

    #[error("sealed value cannot be opened with this master key")]
    Open,

    #[error("sealed value is not UTF-8")]
    NotUtf8,

    #[error("random source unavailable")]
    Random,
}

/// True when a stored value is a sealed token rather than plaintext
pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

pub struct MasterKey {
    key: LessSafeKey,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(***REDACTED***)")
    }
}

impl MasterKey {
    /// Build from the environment value: raw hex key or passphrase
    ///
    /// # Errors
    ///
    /// `EmptyKey` for a blank value.
    pub fn from_secret(secret: &str) -> Result<Self, SecretError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(SecretError::EmptyKey);
        }
        let mut raw = [0u8; 32];
        match hex::decode(secret) {
            Ok(bytes) if bytes.len() == raw.len() => raw.copy_from_slice(&bytes),
            _ => pbkdf2::derive(
                pbkdf2::PBKDF2_HMAC_SHA256,
                KDF_ITERATIONS,
                KDF_SALT,
                secret.as_bytes(),
                &mut raw,
            ),
        }
        let key = UnboundKey::new(&AES_256_GCM, &raw).map_err(|_| SecretError::BadKey)?;
        Ok(Self {
            key: LessSafeKey::new(key),
        })
    }

    /// Read the key from `var`; `None` when the variable is unset
    ///
    /// # Errors
    ///
    /// `EmptyKey` when the variable is set but blank.
    pub fn from_env(var: &str) -> Result<Option<Self>, SecretError> {
        match std::env::var(var) {
            Ok(value) => Self::from_secret(&value).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Seal a plaintext secret into an `enc:v1:` token
    ///
    /// # Errors
    ///
    /// `Random` if no nonce can be drawn.
    pub fn seal(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce)
            .map_err(|_| SecretError::Random)?;
        let mut sealed = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(AAD),
                &mut sealed,
            )
            .map_err(|_| SecretError::BadKey)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(format!("{}{}", SEALED_PREFIX, STANDARD.encode(payload)))
    }

    /// Open an `enc:v1:` token
    ///
    /// # Errors
    ///
    /// `Encoding` or `Truncated` for a malformed token, `Open` when the key
    /// is wrong or the token was altered.
    pub fn open(&self, token: &str) -> Result<String, SecretError> {
        let body = token.strip_prefix(SEALED_PREFIX).unwrap_or(token);
        let payload = STANDARD
            .decode(body.trim())
            .map_err(|_| SecretError::Encoding)?;
        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(SecretError::Truncated);
        }
        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| SecretError::Truncated)?;
        let mut sealed = sealed.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::from(AAD), &mut sealed)
            .map_err(|_| SecretError::Open)?;
        String::from_utf8(plain.to_vec()).map_err(|_| SecretError::NotUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn test_sealed_token_opens_with_same_key() {
        let key = MasterKey::from_secret(HEX_KEY).unwrap();
        let token = key.seal("hunter2").unwrap();

        assert!(is_sealed(&token));
        assert!(!token.contains("hunter2"));
        assert_eq!(key.open(&token).unwrap(), "hunter2");
    }

    #[test]
    fn test_each_seal_uses_a_fresh_nonce() {
        let key = MasterKey::from_secret(HEX_KEY).unwrap();
        assert_ne!(key.seal("same").unwrap(), key.seal("same").unwrap());
    }

    #[test]
    fn test_wrong_key_or_altered_token_is_refused() {
        let key = MasterKey::from_secret(HEX_KEY).unwrap();
        let other = MasterKey::from_secret(&"ff".repeat(32)).unwrap();
        let token = key.seal("hunter2").unwrap();

        assert!(matches!(other.open(&token), Err(SecretError::Open)));

        let mut altered = token.clone().into_bytes();
        let last = altered.len() - 3;
        altered[last] = if altered[last] == b'A' { b'B' } else { b'A' };
        let altered = String::from_utf8(altered).unwrap();
        assert!(key.open(&altered).is_err());

        assert!(matches!(key.open("enc:v1:AAAA"), Err(SecretError::Truncated)));
        assert!(matches!(key.open("enc:v1:%%%"), Err(SecretError::Encoding)));
    }

    #[test]
    fn test_passphrase_derives_a_stable_key() {
        let first = MasterKey::from_secret("correct horse battery staple").unwrap();
        let second = MasterKey::from_secret("correct horse battery staple").unwrap();
        let token = first.seal("pw").unwrap();
        assert_eq!(second.open(&token).unwrap(), "pw");
    }

    #[test]
    fn test_blank_key_is_refused() {
        assert!(matches!(MasterKey::from_secret("  "), Err(SecretError::EmptyKey)));
        assert!(is_sealed("enc:v1:abc"));
        assert!(!is_sealed("plain"));
    }

    #[test]
    fn test_debug_does_not_leak_key_material() {
        let key = MasterKey::from_secret(HEX_KEY).unwrap();
        assert_eq!(format!("{:?}", key), "MasterKey(***REDACTED***)");
    }
}
