//! Token-issuance client used to refresh access tokens.
//!
//! The session manager is the only caller. It hands over the stored refresh
//! token and receives either a new access token with its lifetime, or an
//! error, which it always treats as a forced logout.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A freshly minted access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in_seconds: u64,
    /// Rotated refresh token, when the issuer hands out a new one.
    pub refresh_token: Option<String>,
}

/// Exchange a refresh token for a new access token, or fail.
pub trait TokenExchange: Send + Sync {
    fn exchange(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<IssuedToken, ApiError>> + Send;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(alias = "expiresIn")]
    expires_in: u64,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

impl From<RefreshResponse> for IssuedToken {
    fn from(resp: RefreshResponse) -> Self {
        Self {
            access_token: resp.access_token,
            expires_in_seconds: resp.expires_in,
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Refresh endpoint client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTokenExchange {
    client: Client,
    refresh_url: String,
}

impl HttpTokenExchange {
    pub fn new(refresh_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            refresh_url: refresh_url.into(),
        })
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_response(status, retry_after.as_deref(), &body))
    }
}

impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<IssuedToken, ApiError> {
        debug!(url = %self.refresh_url, "Requesting access token refresh");

        let response = self
            .client
            .post(&self.refresh_url)
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = Self::check_response(response).await?;

        let body = response.text().await?;
        let parsed: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(ApiError::MalformedResponse("empty access token".to_string()));
        }

        Ok(parsed.into())
    }
}

/// Exchange used when no refresh endpoint is configured: every refresh
/// fails, so an expired session always sends the user back to login.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledExchange;

impl TokenExchange for DisabledExchange {
    async fn exchange(&self, _refresh_token: &str) -> Result<IssuedToken, ApiError> {
        Err(ApiError::RefreshDisabled)
    }
}
