//! Polymorphic session identity
//!
//! Identities are stored as a tagged union `(tag, JSON value)`. A type opts
//! in by implementing [`SessionIdentity`] with a stable tag string; reading
//! the identity back asserts the tag before decoding, so a session written
//! with one identity type is never silently decoded as another.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Serialized identity payload as it lives inside the session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// Stable type tag registered by the application
    pub tag: String,
    /// JSON-encoded identity value
    pub data: serde_json::Value,
}

impl StoredIdentity {
    /// Encode a typed identity
    pub fn encode<T: SessionIdentity>(identity: &T) -> Result<Self> {
        Ok(Self {
            tag: T::type_tag().to_string(),
            data: serde_json::to_value(identity)
                .map_err(|e| Error::Session(format!("failed to encode identity: {}", e)))?,
        })
    }

    /// Decode as `T`, asserting the stored tag matches `T::type_tag()`
    pub fn decode<T: SessionIdentity>(&self) -> Result<T> {
        if self.tag != T::type_tag() {
            return Err(Error::Session(format!(
                "identity tag mismatch: stored '{}', requested '{}'",
                self.tag,
                T::type_tag()
            )));
        }
        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::Session(format!("failed to decode identity: {}", e)))
    }
}

/// A user-defined type that can mark a session as authenticated
pub trait SessionIdentity: Serialize + DeserializeOwned {
    /// Stable tag naming this identity type in serialized sessions.
    ///
    /// Changing the tag invalidates existing sessions carrying it.
    fn type_tag() -> &'static str;
}
