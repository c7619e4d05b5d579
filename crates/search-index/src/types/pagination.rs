//! Continuation tokens.
//!
//! Every backend pages with its own cursor shape (a partition/row key pair,
//! a surrogate id, an SDK token). Callers only ever see the opaque
//! [`ContinuationToken`], which is `base64(JSON(cursor))`.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{BackendError, SearchError};

/// An opaque continuation token handed to callers between pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Encodes a backend cursor into a token.
    pub fn encode<C: Serialize>(cursor: &C) -> Result<Self, BackendError> {
        let json = serde_json::to_vec(cursor).map_err(|e| BackendError::SerializationError {
            message: format!("cursor cannot be serialized: {}", e),
        })?;
        Ok(Self(STANDARD.encode(json)))
    }

    /// Decodes a token back into the backend cursor it was created from.
    pub fn decode<C: DeserializeOwned>(&self) -> Result<C, SearchError> {
        let invalid = || SearchError::InvalidContinuationToken {
            token: self.0.clone(),
        };
        let bytes = STANDARD.decode(&self.0).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }

    /// Wraps a token string received from a caller.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
