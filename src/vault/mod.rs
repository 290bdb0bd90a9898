//! Encryption of API credentials at rest.
//!
//! The `CredentialVault` seals raw API keys with AES-256-GCM under a
//! process-wide secret. Every ciphertext carries its own random nonce, so
//! sealing the same key twice yields different bytes, and any tampering is
//! caught by the authentication tag on open.
//!
//! This module depends on nothing else in the crate so it can be tested and
//! reused on its own.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

/// Length in bytes of the vault secret.
pub const SECRET_LEN: usize = 32;

/// Number of hex characters kept from the SHA-256 digest of a credential.
pub const KEY_ID_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("vault secret is missing")]
    MissingSecret,

    #[error("vault secret is malformed: {0}")]
    MalformedSecret(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("ciphertext failed authentication")]
    Tampered,

    #[error("ciphertext is truncated")]
    Truncated,

    #[error("decrypted credential is not valid UTF-8")]
    InvalidUtf8,

    #[error("system random source unavailable")]
    Random,
}

/// Symmetric sealer for raw credentials.
pub struct CredentialVault {
    key: LessSafeKey,
    rng: SystemRandom,
    ephemeral: bool,
}

// The AEAD key never appears in debug output.
impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"[REDACTED]")
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

impl CredentialVault {
    /// Builds a vault from a base64-encoded 32-byte secret.
    pub fn from_base64(secret: &str) -> Result<Self, VaultError> {
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return Err(VaultError::MissingSecret);
        }

        let bytes = Zeroizing::new(
            STANDARD
                .decode(trimmed)
                .map_err(|e| VaultError::MalformedSecret(format!("invalid base64: {}", e)))?,
        );

        if bytes.len() != SECRET_LEN {
            return Err(VaultError::MalformedSecret(format!(
                "expected {} bytes, got {}",
                SECRET_LEN,
                bytes.len()
            )));
        }

        Self::from_bytes(&bytes[..], false)
    }

    /// Builds a vault from the configured secret, or generates a throwaway one.
    ///
    /// A generated secret lives only as long as the process: anything sealed
    /// with it is unreadable after a restart. It is never written anywhere.
    pub fn from_optional(secret: Option<&str>) -> Result<Self, VaultError> {
        match secret {
            Some(s) if !s.trim().is_empty() => Self::from_base64(s),
            _ => {
                warn!(
                    "No vault secret configured; generated an ephemeral one. \
                     Encrypted keys will not survive a restart. \
                     Set HOOPGUARD_ENCRYPTION_KEY to a base64 32-byte secret."
                );
                Self::ephemeral()
            }
        }
    }

    /// Builds a vault around a freshly generated random secret.
    pub fn ephemeral() -> Result<Self, VaultError> {
        let rng = SystemRandom::new();
        let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
        rng.fill(&mut bytes[..]).map_err(|_| VaultError::Random)?;
        Self::from_bytes(&bytes[..], true)
    }

    /// Generates a new secret suitable for `HOOPGUARD_ENCRYPTION_KEY`.
    pub fn generate_secret() -> Result<Zeroizing<String>, VaultError> {
        let rng = SystemRandom::new();
        let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
        rng.fill(&mut bytes[..]).map_err(|_| VaultError::Random)?;
        Ok(Zeroizing::new(STANDARD.encode(&bytes[..])))
    }

    fn from_bytes(bytes: &[u8], ephemeral: bool) -> Result<Self, VaultError> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| VaultError::MalformedSecret("rejected by cipher".to_string()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
            ephemeral,
        })
    }

    /// Whether the secret was generated for this process only.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Seals a raw credential. Output layout: `nonce || ciphertext || tag`.
    pub fn encrypt(&self, raw: &str) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::Random)?;

        let mut in_out = Zeroizing::new(raw.as_bytes().to_vec());
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut *in_out,
            )
            .map_err(|_| VaultError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    /// Opens a sealed credential. Fails on any modification of the bytes.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<String>, VaultError> {
        let tag_len = AES_256_GCM.tag_len();
        if sealed.len() < NONCE_LEN + tag_len {
            return Err(VaultError::Truncated);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| VaultError::Truncated)?;

        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut *buffer)
            .map_err(|_| VaultError::Tampered)?;

        let text = std::str::from_utf8(plaintext).map_err(|_| VaultError::InvalidUtf8)?;
        Ok(Zeroizing::new(text.to_string()))
    }

    /// One-way identifier for a raw credential: truncated hex SHA-256.
    pub fn derive_key_id(raw: &str) -> String {
        let digest = Sha256::digest(raw.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(KEY_ID_LEN);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        let secret = STANDARD.encode([7u8; SECRET_LEN]);
        CredentialVault::from_base64(&secret).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let vault = test_vault();
        let sealed = vault.encrypt("bdl_live_0123456789").unwrap();
        assert_eq!(vault.decrypt(&sealed).unwrap().as_str(), "bdl_live_0123456789");
    }

    #[test]
    fn test_ciphertext_is_not_deterministic() {
        let vault = test_vault();
        let a = vault.encrypt("pro_abcdefghij").unwrap();
        let b = vault.encrypt("pro_abcdefghij").unwrap();
        assert_ne!(a, b);
        assert!(!a.windows(4).any(|w| w == b"pro_"));
    }

    #[test]
    fn test_tamper_is_detected() {
        let vault = test_vault();
        let mut sealed = vault.encrypt("ent_supersecretkey").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(vault.decrypt(&sealed).unwrap_err(), VaultError::Tampered);
    }

    #[test]
    fn test_truncated_ciphertext() {
        let vault = test_vault();
        assert_eq!(vault.decrypt(&[0u8; 8]).unwrap_err(), VaultError::Truncated);
    }

    #[test]
    fn test_other_secret_cannot_open() {
        let vault = test_vault();
        let other = CredentialVault::ephemeral().unwrap();
        let sealed = vault.encrypt("bdl_0123456789").unwrap();
        assert_eq!(other.decrypt(&sealed).unwrap_err(), VaultError::Tampered);
    }

    #[test]
    fn test_malformed_secrets() {
        assert_eq!(
            CredentialVault::from_base64("   ").unwrap_err(),
            VaultError::MissingSecret
        );
        assert!(matches!(
            CredentialVault::from_base64("not base64 !!").unwrap_err(),
            VaultError::MalformedSecret(_)
        ));
        let short = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            CredentialVault::from_base64(&short).unwrap_err(),
            VaultError::MalformedSecret(_)
        ));
    }

    #[test]
    fn test_missing_secret_falls_back_to_ephemeral() {
        let vault = CredentialVault::from_optional(None).unwrap();
        assert!(vault.is_ephemeral());
        assert!(!test_vault().is_ephemeral());
    }

    #[test]
    fn test_generated_secret_is_usable() {
        let secret = CredentialVault::generate_secret().unwrap();
        let vault = CredentialVault::from_base64(&secret).unwrap();
        let sealed = vault.encrypt("sk_generated_key").unwrap();
        assert_eq!(vault.decrypt(&sealed).unwrap().as_str(), "sk_generated_key");
    }

    #[test]
    fn test_key_id_shape() {
        let id = CredentialVault::derive_key_id("bdl_0123456789");
        assert_eq!(id.len(), KEY_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, CredentialVault::derive_key_id("bdl_0123456789"));
        assert_ne!(id, CredentialVault::derive_key_id("bdl_0123456780"));
    }

    #[test]
    fn test_debug_impl_masks_key() {
        let debug_str = format!("{:?}", test_vault());
        assert!(debug_str.contains("[REDACTED]"));
    }
}
