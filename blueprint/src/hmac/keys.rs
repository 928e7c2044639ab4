//! HMAC key registry

use crate::error::Result;
use crate::secret::SecureCredential;

/// A named signing key.
///
/// The secret lives in a [`SecureCredential`] and is decrypted only for the
/// duration of a sign or verify operation.
pub struct HmacKey {
    key_id: String,
    credential: SecureCredential,
}

impl HmacKey {
    pub fn new(key_id: impl Into<String>, secret: &[u8]) -> Result<Self> {
        Ok(Self {
            key_id: key_id.into(),
            credential: SecureCredential::new(secret)?,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn credential(&self) -> &SecureCredential {
        &self.credential
    }
}

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKey")
            .field("key_id", &self.key_id)
            .field("secret", &"***redacted***")
            .finish()
    }
}

/// Registry of signing keys, iterated in order during verification.
///
/// The first key whose digest matches wins; multiple keys allow zero-downtime
/// rotation.
pub trait KeyProvider: Send + Sync {
    /// Keys in verification order
    fn keys(&self) -> &[HmacKey];

    /// The key used for signing (by convention the first)
    fn signing_key(&self) -> Option<&HmacKey> {
        self.keys().first()
    }
}

/// Default key provider holding exactly one key
pub struct SingleKeyProvider {
    keys: [HmacKey; 1],
}

impl SingleKeyProvider {
    pub fn new(key_id: impl Into<String>, secret: &[u8]) -> Result<Self> {
        Ok(Self {
            keys: [HmacKey::new(key_id, secret)?],
        })
    }
}

impl KeyProvider for SingleKeyProvider {
    fn keys(&self) -> &[HmacKey] {
        &self.keys
    }
}

/// Key provider over an explicit ordered list
pub struct KeyRegistry {
    keys: Vec<HmacKey>,
}

impl KeyRegistry {
    pub fn new(keys: Vec<HmacKey>) -> Self {
        Self { keys }
    }
}

impl KeyProvider for KeyRegistry {
    fn keys(&self) -> &[HmacKey] {
        &self.keys
    }
}
