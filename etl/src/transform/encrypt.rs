use std::fmt;

use aws_lc_rs::cipher::{
    AES_256, DecryptionContext, EncryptionContext, PaddedBlockDecryptingKey,
    PaddedBlockEncryptingKey, UnboundCipherKey,
};
use aws_lc_rs::digest::{SHA256, digest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::state::{StateStore, StateTable};

/// Key of the secret that encrypted the source data in the `global` state table.
pub const OLD_SECRET_KEY: &str = "old_secret_key";

/// Key of the secret used to encrypt the target data in the `global` state table.
pub const NEW_SECRET_KEY: &str = "new_secret_key";

const IV_LEN: usize = 16;

/// AES-256-CBC key with PKCS#7 padding derived from a secret string.
///
/// The key is the SHA-256 digest of the secret and the IV its first 16 bytes. Ciphertexts are
/// base64 encoded, which is the column format the target application reads.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; 32],
}

impl SymmetricKey {
    pub fn from_secret(secret: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(digest(&SHA256, secret.as_bytes()).as_ref());
        Self { key }
    }

    fn iv(&self) -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&self.key[..IV_LEN]);
        iv
    }

    fn cipher_key(&self) -> EtlResult<UnboundCipherKey> {
        UnboundCipherKey::new(&AES_256, &self.key)
            .map_err(|_| etl_error!(ErrorKind::EncryptionError, "Invalid AES key"))
    }

    /// Encrypts `plaintext` and returns the base64 encoded ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> EtlResult<String> {
        let key = PaddedBlockEncryptingKey::cbc_pkcs7(self.cipher_key()?)
            .map_err(|_| etl_error!(ErrorKind::EncryptionError, "Invalid AES-CBC key"))?;

        let mut in_out = plaintext.to_vec();
        key.less_safe_encrypt(&mut in_out, EncryptionContext::Iv128(self.iv().into()))
            .map_err(|_| etl_error!(ErrorKind::EncryptionError, "Encryption failed"))?;

        Ok(STANDARD.encode(in_out))
    }

    /// Decrypts a base64 encoded ciphertext.
    pub fn decrypt(&self, ciphertext: &str) -> EtlResult<Vec<u8>> {
        let key = PaddedBlockDecryptingKey::cbc_pkcs7(self.cipher_key()?)
            .map_err(|_| etl_error!(ErrorKind::EncryptionError, "Invalid AES-CBC key"))?;

        let mut in_out = STANDARD.decode(ciphertext.trim())?;
        let plaintext = key
            .decrypt(&mut in_out, DecryptionContext::Iv128(self.iv().into()))
            .map_err(|_| {
                etl_error!(
                    ErrorKind::EncryptionError,
                    "Decryption failed, wrong key or corrupted ciphertext"
                )
            })?;

        Ok(plaintext.to_vec())
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(REDACTED)")
    }
}

/// Decrypts values under the old secret and encrypts them under the new one.
#[derive(Debug, Clone)]
pub struct Reencryptor {
    old: SymmetricKey,
    new: SymmetricKey,
}

impl Reencryptor {
    pub fn new(old_secret: &str, new_secret: &str) -> Self {
        Self {
            old: SymmetricKey::from_secret(old_secret),
            new: SymmetricKey::from_secret(new_secret),
        }
    }

    /// Builds a re-encryptor from the secrets stored in the `global` state table.
    ///
    /// Returns `None` when no secret is stored and fails when only one of them is.
    pub fn from_state(state: &StateStore) -> EtlResult<Option<Self>> {
        let secret = |key: &str| {
            state
                .get(StateTable::Global, key)
                .and_then(|row| row.get("value"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        match (secret(OLD_SECRET_KEY), secret(NEW_SECRET_KEY)) {
            (Some(old), Some(new)) => Ok(Some(Self::new(&old, &new))),
            (None, None) => Ok(None),
            _ => Err(etl_error!(
                ErrorKind::ConfigError,
                "Only one of the re-encryption secrets is set",
                format!("expected both `{OLD_SECRET_KEY}` and `{NEW_SECRET_KEY}` in global state")
            )),
        }
    }

    pub fn reencrypt(&self, ciphertext: &str) -> EtlResult<String> {
        let plaintext = self.old.decrypt(ciphertext)?;
        self.new.encrypt(&plaintext)
    }
}
