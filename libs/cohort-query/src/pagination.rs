//! Stateless pagination cursors.
//!
//! A token is base64url(`"<offset>:<parameterHash>"`). The hash ties a token
//! to the request it was issued for, so a client cannot resume a page with a
//! different query.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaginationToken {
    pub offset: i64,
    pub parameter_hash: String,
}

impl PaginationToken {
    pub fn new(offset: i64, parameter_hash: impl Into<String>) -> Self {
        Self {
            offset,
            parameter_hash: parameter_hash.into(),
        }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.offset, self.parameter_hash))
    }

    /// Parse a token. Padding is accepted but not required.
    pub fn decode(token: &str) -> Result<Self> {
        let invalid = || Error::cursor(format!("Invalid pagination token: {token}"));
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (offset, hash) = text.split_once(':').ok_or_else(invalid)?;
        let offset = offset.parse::<i64>().map_err(|_| invalid())?;
        Ok(Self::new(offset, hash))
    }

    /// Reject tokens issued for other parameters or carrying a negative
    /// offset.
    pub fn validate(&self, parameter_hash: &str) -> Result<()> {
        if self.offset < 0 {
            return Err(Error::cursor(format!(
                "Invalid pagination token: negative offset {}",
                self.offset
            )));
        }
        if self.parameter_hash != parameter_hash {
            return Err(Error::cursor(
                "Invalid pagination token: parameters do not match the request",
            ));
        }
        Ok(())
    }
}

/// SHA-256 (hex) of the canonical JSON of `parameters`.
///
/// Struct fields serialize in declaration order and sets are ordered, so
/// equal requests always hash the same.
pub fn parameter_hash<T: Serialize + ?Sized>(parameters: &T) -> Result<String> {
    let json = serde_json::to_vec(parameters)?;
    Ok(hex::encode(Sha256::digest(&json)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BadRequestReason;

    #[test]
    fn encodes_offset_and_hash() {
        let token = PaginationToken::new(2, "abc");
        let encoded = token.encode();
        assert_eq!(encoded, URL_SAFE_NO_PAD.encode("2:abc"));
        assert_eq!(PaginationToken::decode(&encoded).unwrap(), token);
        assert_eq!(
            PaginationToken::decode(&format!("{encoded}=")).unwrap(),
            token
        );
    }

    #[test]
    fn rejects_garbage() {
        for token in [
            "!!!".to_string(),
            URL_SAFE_NO_PAD.encode("no-separator"),
            URL_SAFE_NO_PAD.encode("x:abc"),
        ] {
            let err = PaginationToken::decode(&token).unwrap_err();
            assert_eq!(err.reason(), Some(BadRequestReason::Cursor));
        }
    }

    #[test]
    fn validation() {
        PaginationToken::new(0, "h").validate("h").unwrap();
        let err = PaginationToken::new(-1, "h").validate("h").unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Cursor));
        assert!(PaginationToken::new(5, "h").validate("other").is_err());
    }

    #[test]
    fn hash_is_sha256_hex() {
        let hash = parameter_hash(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, parameter_hash(&serde_json::json!({"a": 1})).unwrap());
        assert_ne!(hash, parameter_hash(&serde_json::json!({"a": 2})).unwrap());
    }
}
