//! KIS Approval Key Issuer
//!
//! Exchanges the app key and secret for a WebSocket approval key:
//!
//! ```text
//! POST {rest_url}{approval_path}
//! {"grant_type":"client_credentials","appkey":"..","appsecret":".."}
//! → {"approval_key":".."}
//! ```
//!
//! A fresh key is requested for every connection attempt.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::application::ports::{ApprovalKey, ApprovalKeyError, ApprovalKeyIssuer};

/// Default REST base URL.
pub const DEFAULT_REST_URL: &str = "https://openapi.koreainvestment.com:9443";

/// Default approval key path.
pub const DEFAULT_APPROVAL_PATH: &str = "/oauth2/Approval";

/// Approval keys carry no expiry on the wire; they are treated as valid for a day.
const APPROVAL_KEY_TTL_HOURS: i64 = 24;

/// KIS application credentials.
#[derive(Clone)]
pub struct AppCredentials {
    /// Application key.
    pub app_key: String,
    /// Application secret.
    pub app_secret: String,
}

impl AppCredentials {
    /// Create credentials.
    #[must_use]
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Whether both halves are present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.app_key.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct ApprovalRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Deserialize)]
struct ApprovalResponse {
    #[serde(default)]
    approval_key: Option<String>,
}

/// HTTP issuer for KIS approval keys.
#[derive(Clone)]
pub struct HttpApprovalKeyIssuer {
    client: reqwest::Client,
    url: String,
    credentials: AppCredentials,
}

impl fmt::Debug for HttpApprovalKeyIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApprovalKeyIssuer")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl HttpApprovalKeyIssuer {
    /// Create an issuer posting to `rest_url` + `approval_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        rest_url: &str,
        approval_path: &str,
        credentials: AppCredentials,
        timeout: Duration,
    ) -> Result<Self, ApprovalKeyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApprovalKeyError::RequestFailed {
                message: e.to_string(),
            })?;

        let path = if approval_path.trim().is_empty() {
            DEFAULT_APPROVAL_PATH
        } else {
            approval_path.trim()
        };

        Ok(Self {
            client,
            url: format!("{}{}", rest_url.trim_end_matches('/'), path),
            credentials,
        })
    }

    /// Full approval URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ApprovalKeyIssuer for HttpApprovalKeyIssuer {
    async fn issue(&self) -> Result<ApprovalKey, ApprovalKeyError> {
        let request = ApprovalRequest {
            grant_type: "client_credentials",
            appkey: &self.credentials.app_key,
            appsecret: &self.credentials.app_secret,
        };

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApprovalKeyError::Timeout
                } else {
                    ApprovalKeyError::RequestFailed {
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApprovalKeyError::Rejected { status, body });
        }

        let body: ApprovalResponse =
            response
                .json()
                .await
                .map_err(|e| ApprovalKeyError::InvalidResponse {
                    message: format!("Failed to parse approval response: {e}"),
                })?;

        let key = body
            .approval_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ApprovalKeyError::InvalidResponse {
                message: "approval_key missing or blank".to_string(),
            })?;

        tracing::debug!("Issued KIS approval key");
        Ok(ApprovalKey::new(key).with_expiry(Utc::now() + chrono::Duration::hours(APPROVAL_KEY_TTL_HOURS)))
    }
}
