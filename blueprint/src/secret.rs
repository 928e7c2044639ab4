//! In-memory credential with clear-on-use semantics
//!
//! A [`SecureCredential`] never holds its secret in the clear: the secret is
//! encrypted with AES-256-GCM under an ephemeral per-credential key as soon
//! as the credential is constructed. `get()` decrypts into a buffer that is
//! wiped when dropped; `clear()` zeroizes the ephemeral key, after which the
//! secret is unrecoverable.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::TryRngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// Encrypted in-memory credential.
pub struct SecureCredential {
    // nonce || ciphertext
    ciphertext: Vec<u8>,
    key: Zeroizing<[u8; KEY_LENGTH]>,
    cleared: bool,
}

impl SecureCredential {
    /// Encrypt `secret` under a fresh ephemeral key
    pub fn new(secret: &[u8]) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        fill_random(key.as_mut())?;

        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|_| Error::Credential("invalid ephemeral key length".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        fill_random(&mut nonce_bytes)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut encrypted = cipher
            .encrypt(nonce, secret)
            .map_err(|_| Error::Credential("encryption failure".to_string()))?;

        let mut ciphertext = Vec::with_capacity(NONCE_LENGTH + encrypted.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.append(&mut encrypted);

        Ok(Self {
            ciphertext,
            key,
            cleared: false,
        })
    }

    /// Encrypt a UTF-8 secret
    pub fn from_string(secret: &str) -> Result<Self> {
        Self::new(secret.as_bytes())
    }

    /// Decrypt the secret into a buffer that is wiped on drop.
    ///
    /// Fails once `clear()` has been called.
    pub fn get(&self) -> Result<Zeroizing<Vec<u8>>> {
        if self.cleared {
            return Err(Error::Credential("credential has been cleared".to_string()));
        }

        if self.ciphertext.len() <= NONCE_LENGTH {
            return Err(Error::Credential("malformed ciphertext".to_string()));
        }

        let (nonce_bytes, encrypted) = self.ciphertext.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new_from_slice(self.key.as_ref())
            .map_err(|_| Error::Credential("invalid ephemeral key length".to_string()))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|_| Error::Credential("decryption failure".to_string()))?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Zeroize the decryption key; subsequent `get()` calls fail
    pub fn clear(&mut self) {
        self.key.zeroize();
        self.cleared = true;
    }

    /// Whether the credential has been cleared
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }
}

impl std::fmt::Debug for SecureCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCredential")
            .field("secret", &"***redacted***")
            .field("cleared", &self.cleared)
            .finish()
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| Error::Credential(format!("entropy source failure: {}", e)))
}
