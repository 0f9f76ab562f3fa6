//! Failures of a refresh round-trip with the token issuer.
//!
//! The session manager ends the session on every variant. The distinction
//! only matters for logs.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The issuer refused the refresh token itself (expired, revoked, unknown).
    #[error("Refresh token rejected (HTTP {status}): {reason}")]
    RefreshRejected { status: u16, reason: String },

    #[error("Issuer is throttling refresh requests")]
    Throttled { retry_after_secs: Option<u64> },

    #[error("Issuer unavailable (HTTP {status})")]
    IssuerUnavailable { status: u16 },

    #[error("Could not reach issuer: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed issuer response: {0}")]
    MalformedResponse(String),

    #[error("No refresh endpoint configured")]
    RefreshDisabled,
}

/// Longest issuer body kept in an error message.
const MAX_REASON_BYTES: usize = 200;

/// OAuth-style error body, e.g. `{"error": "invalid_grant"}`.
#[derive(Debug, Deserialize)]
struct IssuerErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl ApiError {
    /// Map a non-success issuer response.
    pub fn from_response(status: reqwest::StatusCode, retry_after: Option<&str>, body: &str) -> Self {
        let status = status.as_u16();
        match status {
            400 | 401 | 403 => ApiError::RefreshRejected {
                status,
                reason: rejection_reason(body),
            },
            429 => ApiError::Throttled {
                retry_after_secs: retry_after.and_then(|v| v.trim().parse().ok()),
            },
            500..=599 => ApiError::IssuerUnavailable { status },
            _ => ApiError::MalformedResponse(format!("unexpected HTTP {}", status)),
        }
    }

    /// The stored refresh token is known to be dead, as opposed to a
    /// failure of the issuer or the network.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::RefreshRejected { .. })
    }
}

fn rejection_reason(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<IssuerErrorBody>(body) {
        return match parsed.error_description {
            Some(description) => format!("{}: {}", parsed.error, description),
            None => parsed.error,
        };
    }
    let body = body.trim();
    if body.is_empty() {
        return "no reason given".to_string();
    }
    let mut end = body.len().min(MAX_REASON_BYTES);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
