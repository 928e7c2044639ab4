//! JWT issuance, validation, refresh, and revocation

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::{Error, Result};
use crate::kv::{KvStore, MemoryKvStore};

/// Claims carried by every issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token id, unique per issuance (revocation handle)
    pub jti: String,

    /// Subject (user or client identifier)
    pub sub: String,

    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Application payload
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

/// Storage for revoked token ids (jti).
///
/// Entries are TTL-bounded to the token's remaining life so the set never
/// grows past the live-token population.
#[async_trait]
pub trait JwtRevocation: Send + Sync {
    /// Check if a token id has been revoked
    async fn is_revoked(&self, jti: &str) -> Result<bool>;

    /// Revoke a token id for `ttl`
    async fn revoke(&self, jti: &str, ttl: Duration) -> Result<()>;
}

/// Revocation list over any [`KvStore`] backend
pub struct KvJwtRevocation<S> {
    store: S,
    key_prefix: String,
}

impl<S: KvStore> KvJwtRevocation<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            key_prefix: "jwt:revoked:".to_string(),
        }
    }

    fn revocation_key(&self, jti: &str) -> String {
        format!("{}{}", self.key_prefix, jti)
    }
}

#[async_trait]
impl<S: KvStore> JwtRevocation for KvJwtRevocation<S> {
    async fn is_revoked(&self, jti: &str) -> Result<bool> {
        self.store.exists(&self.revocation_key(jti)).await
    }

    async fn revoke(&self, jti: &str, ttl: Duration) -> Result<()> {
        self.store.set(&self.revocation_key(jti), b"1", ttl).await
    }
}

/// In-memory revocation list (default)
pub type MemoryJwtRevocation = KvJwtRevocation<MemoryKvStore>;

/// Redis-backed revocation list for multi-instance deployments
#[cfg(feature = "cache")]
pub type RedisJwtRevocation = KvJwtRevocation<crate::kv::RedisKvStore>;

impl Default for MemoryJwtRevocation {
    fn default() -> Self {
        Self::new(MemoryKvStore::default())
    }
}

/// JWT provider: issues, parses, refreshes, and revokes bearer tokens
pub struct JwtProvider {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration: Duration,
    issuer: Option<String>,
    audience: Option<String>,
    revocation: Option<Arc<dyn JwtRevocation>>,
}

impl JwtProvider {
    /// Build a provider from configuration; fatal on bad key material
    pub fn new(config: &JwtConfig) -> Result<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;

        let (encoding_key, decoding_key) = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config.signing_key.as_deref().ok_or_else(|| {
                    config_error("HS* algorithms require jwt.signing_key")
                })?;
                (
                    EncodingKey::from_secret(secret.as_bytes()),
                    DecodingKey::from_secret(secret.as_bytes()),
                )
            }
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                let (private_pem, public_pem) = read_key_pair(config)?;
                (
                    EncodingKey::from_rsa_pem(&private_pem)?,
                    DecodingKey::from_rsa_pem(&public_pem)?,
                )
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                let (private_pem, public_pem) = read_key_pair(config)?;
                (
                    EncodingKey::from_ec_pem(&private_pem)?,
                    DecodingKey::from_ec_pem(&public_pem)?,
                )
            }
            Algorithm::EdDSA => {
                let (private_pem, public_pem) = read_key_pair(config)?;
                (
                    EncodingKey::from_ed_pem(&private_pem)?,
                    DecodingKey::from_ed_pem(&public_pem)?,
                )
            }
            other => {
                return Err(config_error(&format!(
                    "unsupported JWT algorithm: {:?}",
                    other
                )))
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_aud = config.audience.is_some();
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            validation,
            expiration: Duration::from_secs(config.expiration_secs),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            revocation: None,
        })
    }

    /// Attach a revocation backend; `parse_token` then rejects revoked ids
    pub fn with_revocation<R: JwtRevocation + 'static>(mut self, revocation: R) -> Self {
        self.revocation = Some(Arc::new(revocation));
        self
    }

    /// Issue a token for `subject` carrying `data`
    pub fn generate_token(
        &self,
        subject: &str,
        data: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.expiration.as_secs() as i64,
            data,
        };

        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?)
    }

    /// Verify and decode a token.
    ///
    /// Rejects tokens whose header algorithm differs from the configured one
    /// before any signature work, then checks signature, issuer/audience,
    /// the `[iat, exp]` window, and the revocation list.
    pub async fn parse_token(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token)?;
        if header.alg != self.algorithm {
            return Err(Error::Unauthorized(format!(
                "token algorithm {:?} does not match configured {:?}",
                header.alg, self.algorithm
            )));
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = token_data.claims;

        if claims.iat > Utc::now().timestamp() {
            return Err(Error::Unauthorized("token issued in the future".to_string()));
        }

        if let Some(revocation) = &self.revocation {
            if revocation.is_revoked(&claims.jti).await? {
                return Err(Error::Unauthorized("token has been revoked".to_string()));
            }
        }

        Ok(claims)
    }

    /// Issue a fresh token (new id, new window) with the subject and data of
    /// a currently-valid token
    pub async fn refresh(&self, token: &str) -> Result<String> {
        let claims = self.parse_token(token).await?;
        self.generate_token(&claims.sub, claims.data)
    }

    /// Revoke a token for the remainder of its life
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let revocation = self.revocation.as_ref().ok_or_else(|| {
            Error::Internal("no revocation backend configured".to_string())
        })?;

        let claims = self.parse_token(token).await?;
        let remaining = (claims.exp - Utc::now().timestamp()).max(1) as u64;
        revocation
            .revoke(&claims.jti, Duration::from_secs(remaining))
            .await
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name.to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        "EDDSA" => Ok(Algorithm::EdDSA),
        other => Err(config_error(&format!(
            "unsupported JWT algorithm: {}",
            other
        ))),
    }
}

fn read_key_pair(config: &JwtConfig) -> Result<(Vec<u8>, Vec<u8>)> {
    let private_path = config
        .private_key_path
        .as_ref()
        .ok_or_else(|| config_error("asymmetric algorithms require jwt.private_key_path"))?;
    let public_path = config
        .public_key_path
        .as_ref()
        .ok_or_else(|| config_error("asymmetric algorithms require jwt.public_key_path"))?;

    let private_pem = fs::read(private_path).map_err(|e| {
        config_error(&format!(
            "failed to read JWT private key '{}': {}",
            private_path.display(),
            e
        ))
    })?;
    let public_pem = fs::read(public_path).map_err(|e| {
        config_error(&format!(
            "failed to read JWT public key '{}': {}",
            public_path.display(),
            e
        ))
    })?;

    Ok((private_pem, public_pem))
}

fn config_error(message: &str) -> Error {
    Error::Config(Box::new(figment::Error::from(message.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> JwtConfig {
        JwtConfig {
            algorithm: "HS256".to_string(),
            signing_key: Some(secret.to_string()),
            expiration_secs: 3600,
            issuer: Some("blueprint-test".to_string()),
            audience: Some("clients".to_string()),
            ..JwtConfig::default()
        }
    }

    fn payload() -> HashMap<String, serde_json::Value> {
        HashMap::from([("role".to_string(), serde_json::json!("admin"))])
    }

    #[tokio::test]
    async fn test_generate_and_parse() {
        let provider = JwtProvider::new(&config("k1")).unwrap();
        let token = provider.generate_token("user:42", payload()).unwrap();

        let claims = provider.parse_token(&token).await.unwrap();
        assert_eq!(claims.sub, "user:42");
        assert_eq!(claims.iss.as_deref(), Some("blueprint-test"));
        assert_eq!(claims.aud.as_deref(), Some("clients"));
        assert_eq!(claims.data["role"], serde_json::json!("admin"));
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn test_unique_jti_per_issuance() {
        let provider = JwtProvider::new(&config("k1")).unwrap();
        let a = provider.generate_token("user:1", HashMap::new()).unwrap();
        let b = provider.generate_token("user:1", HashMap::new()).unwrap();

        let ca = provider.parse_token(&a).await.unwrap();
        let cb = provider.parse_token(&b).await.unwrap();
        assert_ne!(ca.jti, cb.jti);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let issuer = JwtProvider::new(&config("k1")).unwrap();
        let verifier = JwtProvider::new(&config("other")).unwrap();

        let token = issuer.generate_token("user:1", HashMap::new()).unwrap();
        assert!(verifier.parse_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_issuer_mismatch_rejected() {
        let issuer = JwtProvider::new(&config("k1")).unwrap();

        let mut other = config("k1");
        other.issuer = Some("someone-else".to_string());
        let verifier = JwtProvider::new(&other).unwrap();

        let token = issuer.generate_token("user:1", HashMap::new()).unwrap();
        assert!(verifier.parse_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_header_algorithm_mismatch_rejected() {
        let mut hs384 = config("k1");
        hs384.algorithm = "HS384".to_string();
        let issuer = JwtProvider::new(&hs384).unwrap();
        let verifier = JwtProvider::new(&config("k1")).unwrap();

        let token = issuer.generate_token("user:1", HashMap::new()).unwrap();
        let err = verifier.parse_token(&token).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_revoked_token_fails_parse() {
        let provider =
            JwtProvider::new(&config("k1")).unwrap().with_revocation(MemoryJwtRevocation::default());

        let token = provider.generate_token("user:1", HashMap::new()).unwrap();
        assert!(provider.parse_token(&token).await.is_ok());

        provider.revoke_token(&token).await.unwrap();

        // Signature is still cryptographically valid, but the id is revoked
        let err = provider.parse_token(&token).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_refresh_issues_new_id_same_payload() {
        let provider = JwtProvider::new(&config("k1")).unwrap();
        let token = provider.generate_token("user:7", payload()).unwrap();

        let refreshed = provider.refresh(&token).await.unwrap();
        let old = provider.parse_token(&token).await.unwrap();
        let new = provider.parse_token(&refreshed).await.unwrap();

        assert_ne!(old.jti, new.jti);
        assert_eq!(new.sub, "user:7");
        assert_eq!(new.data, old.data);
    }

    #[test]
    fn test_unknown_algorithm_is_fatal() {
        let mut bad = config("k1");
        bad.algorithm = "ROT13".to_string();
        assert!(JwtProvider::new(&bad).is_err());
    }
}
