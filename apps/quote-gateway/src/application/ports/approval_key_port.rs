//! Approval Key Port (Driven Port)
//!
//! Interface for obtaining the token an upstream realtime connection
//! authenticates with.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Approval key issuance error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApprovalKeyError {
    /// The issuer could not be reached.
    #[error("Approval key request failed: {message}")]
    RequestFailed { message: String },

    /// The issuer answered with a non-success status.
    #[error("Approval key rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response did not contain a usable key.
    #[error("Approval key response invalid: {message}")]
    InvalidResponse { message: String },

    /// The issuer did not answer in time.
    #[error("Approval key request timed out")]
    Timeout,
}

/// An opaque upstream approval token.
#[derive(Clone, PartialEq, Eq)]
pub struct ApprovalKey {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl ApprovalKey {
    /// Create a key issued now.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Attach an expiry.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The raw token.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the key was obtained.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry, when the issuer reports one.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the key is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl fmt::Debug for ApprovalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalKey")
            .field("value", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Port for issuing approval keys.
#[async_trait]
pub trait ApprovalKeyIssuer: Send + Sync {
    /// Obtain a key for one connection attempt.
    async fn issue(&self) -> Result<ApprovalKey, ApprovalKeyError>;
}

/// Issuer for providers whose token is a static API key.
#[derive(Clone)]
pub struct StaticApprovalKey {
    key: String,
}

impl StaticApprovalKey {
    /// Wrap a static key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl fmt::Debug for StaticApprovalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticApprovalKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl ApprovalKeyIssuer for StaticApprovalKey {
    async fn issue(&self) -> Result<ApprovalKey, ApprovalKeyError> {
        if self.key.trim().is_empty() {
            return Err(ApprovalKeyError::InvalidResponse {
                message: "static key is blank".to_string(),
            });
        }
        Ok(ApprovalKey::new(self.key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_key_is_issued() {
        let issuer = StaticApprovalKey::new("token-1");
        let key = issuer.issue().await.unwrap();
        assert_eq!(key.value(), "token-1");
        assert!(!key.is_expired());
    }

    #[tokio::test]
    async fn blank_static_key_fails() {
        let issuer = StaticApprovalKey::new("  ");
        assert!(matches!(
            issuer.issue().await,
            Err(ApprovalKeyError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn debug_redacts_value() {
        let key = ApprovalKey::new("super-secret");
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));

        let issuer = StaticApprovalKey::new("api-key");
        assert!(!format!("{issuer:?}").contains("api-key"));
    }

    #[test]
    fn expiry_in_past_is_expired() {
        let key = ApprovalKey::new("k").with_expiry(Utc::now() - chrono::Duration::seconds(1));
        assert!(key.is_expired());
    }
}
