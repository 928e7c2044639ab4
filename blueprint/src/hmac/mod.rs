//! Signed-request authentication with HMAC-SHA256
//!
//! Requests carry a three-header tuple: a hex-encoded digest, an RFC 3339
//! timestamp, and a single-use nonce. The signed payload is
//! `nonce || "." || timestamp || "." || body`. Verification checks the
//! timestamp against a clock-skew window, tries every registered key in
//! order with a constant-time digest comparison, and finally records the
//! nonce atomically so a replayed request is rejected for at least twice the
//! acceptance window.

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::HmacConfig;
use crate::error::{Error, Result};

mod keys;
mod nonce;

pub use keys::{HmacKey, KeyProvider, KeyRegistry, SingleKeyProvider};
pub use nonce::{KvNonceStore, MemoryNonceStore, NonceStore};

#[cfg(feature = "cache")]
pub use nonce::RedisNonceStore;

type HmacSha256 = Hmac<Sha256>;

/// A produced signature triple, emitted as the three HMAC headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacSignature {
    /// Hex-encoded HMAC-SHA256 digest
    pub hash: String,
    /// RFC 3339 timestamp of signing
    pub timestamp: String,
    /// Single-use nonce
    pub nonce: String,
}

/// Verification outcome attached to the request on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedHmac {
    pub key_id: String,
    pub timestamp: String,
    pub nonce: String,
}

/// Why a signed request was rejected
#[derive(Debug, PartialEq, Eq)]
pub enum HmacRejection {
    /// One or more of the three headers is missing or empty
    MissingHeaders,
    /// Timestamp failed to parse as RFC 3339
    MalformedTimestamp,
    /// Timestamp outside the acceptance window
    StaleTimestamp,
    /// Body exceeds the configured maximum
    BodyTooLarge,
    /// No registered key produced the presented digest
    NoMatchingKey,
    /// Nonce already seen within its TTL
    Replay,
}

impl std::fmt::Display for HmacRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeaders => write!(f, "missing hmac headers"),
            Self::MalformedTimestamp => write!(f, "malformed timestamp"),
            Self::StaleTimestamp => write!(f, "timestamp outside acceptance window"),
            Self::BodyTooLarge => write!(f, "body exceeds signed-input limit"),
            Self::NoMatchingKey => write!(f, "signature does not match any key"),
            Self::Replay => write!(f, "nonce replay"),
        }
    }
}

/// HMAC signer/verifier over a key registry and a nonce store
pub struct HmacProvider {
    keys: Arc<dyn KeyProvider>,
    nonces: Arc<dyn NonceStore>,
    config: HmacConfig,
}

impl HmacProvider {
    pub fn new(
        config: HmacConfig,
        keys: Arc<dyn KeyProvider>,
        nonces: Arc<dyn NonceStore>,
    ) -> Self {
        Self {
            keys,
            nonces,
            config,
        }
    }

    /// Provider with a single key and a bounded in-memory nonce store
    pub fn single_key(config: HmacConfig, key_id: &str, secret: &[u8]) -> Result<Self> {
        let capacity = config.nonce_capacity;
        Ok(Self::new(
            config,
            Arc::new(SingleKeyProvider::new(key_id, secret)?),
            Arc::new(MemoryNonceStore::bounded(capacity)),
        ))
    }

    pub fn config(&self) -> &HmacConfig {
        &self.config
    }

    /// Sign `body`, producing the header triple with a fresh nonce
    pub fn sign(&self, body: &[u8]) -> Result<HmacSignature> {
        let key = self
            .keys
            .signing_key()
            .ok_or_else(|| Error::Internal("hmac key registry is empty".to_string()))?;

        let nonce = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let hash = compute_digest(key, &nonce, &timestamp, body)?;

        Ok(HmacSignature {
            hash,
            timestamp,
            nonce,
        })
    }

    /// Verify a signed request.
    ///
    /// The checks run in strict order: header presence, timestamp window,
    /// body size, digest match against each key, nonce registration. The
    /// first failing check rejects the request.
    pub async fn verify(
        &self,
        hash: &str,
        timestamp: &str,
        nonce: &str,
        body: &[u8],
    ) -> Result<std::result::Result<VerifiedHmac, HmacRejection>> {
        if hash.is_empty() || timestamp.is_empty() || nonce.is_empty() {
            return Ok(Err(HmacRejection::MissingHeaders));
        }

        let signed_at = match DateTime::parse_from_rfc3339(timestamp) {
            Ok(t) => t.with_timezone(&Utc),
            Err(_) => return Ok(Err(HmacRejection::MalformedTimestamp)),
        };

        let skew = (Utc::now() - signed_at).abs();
        if skew.num_seconds() > self.config.key_interval_secs as i64 {
            return Ok(Err(HmacRejection::StaleTimestamp));
        }

        if body.len() > self.config.max_input_bytes {
            return Ok(Err(HmacRejection::BodyTooLarge));
        }

        let presented = match hex::decode(hash) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(Err(HmacRejection::NoMatchingKey)),
        };

        let mut matched_key_id = None;
        for key in self.keys.keys() {
            let secret = key.credential().get()?;
            let mut mac = <HmacSha256 as Mac>::new_from_slice(&secret)
                .map_err(|_| Error::Internal("invalid hmac key length".to_string()))?;
            mac.update(nonce.as_bytes());
            mac.update(b".");
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(body);

            // verify_slice is constant-time
            if mac.verify_slice(&presented).is_ok() {
                matched_key_id = Some(key.key_id().to_string());
                break;
            }
        }

        let key_id = match matched_key_id {
            Some(id) => id,
            None => return Ok(Err(HmacRejection::NoMatchingKey)),
        };

        // Register the nonce last so an attacker cannot burn nonces with
        // unsigned requests.
        let fresh = self
            .nonces
            .put_if_absent(nonce, self.config.nonce_ttl())
            .await?;
        if !fresh {
            return Ok(Err(HmacRejection::Replay));
        }

        Ok(Ok(VerifiedHmac {
            key_id,
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
        }))
    }
}

fn compute_digest(key: &HmacKey, nonce: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let secret = key.credential().get()?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&secret)
        .map_err(|_| Error::Internal("invalid hmac key length".to_string()))?;
    mac.update(nonce.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
