//! Provider error types and HTTP failure classification.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;
use crate::util::truncate_chars;

/// Upstream bodies are cut to this many characters before they travel further.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider misconfigured: {0}")]
    Misconfigured(String),

    #[error("Provider rejected credentials (HTTP {status}): {body}")]
    InvalidCredential { status: u16, body: String },

    #[error("Provider rate limited: {body}")]
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },

    #[error("Provider error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Classification of a non-2xx provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 401/403 - credentials are wrong, retrying will not help
    InvalidCredential,
    /// 429 - back off and retry later
    RateLimited,
    /// Any other non-2xx
    Upstream,
}

pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::InvalidCredential,
        429 => ErrorClass::RateLimited,
        _ => ErrorClass::Upstream,
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl ProviderError {
    /// Build an error from a failed HTTP response.
    pub fn from_status(status: u16, retry_after: Option<&str>, body: &str) -> Self {
        let body = truncate_chars(body, MAX_ERROR_BODY_CHARS);
        match classify_http_status(status) {
            ErrorClass::InvalidCredential => ProviderError::InvalidCredential { status, body },
            ErrorClass::RateLimited => ProviderError::RateLimited {
                retry_after: parse_retry_after(retry_after),
                body,
            },
            ErrorClass::Upstream => ProviderError::Upstream { status, body },
        }
    }

    /// Read status, `Retry-After` and body off a non-2xx response.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, retry_after.as_deref(), &body)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(401), ErrorClass::InvalidCredential);
        assert_eq!(classify_http_status(403), ErrorClass::InvalidCredential);
        assert_eq!(classify_http_status(429), ErrorClass::RateLimited);
        assert_eq!(classify_http_status(400), ErrorClass::Upstream);
        assert_eq!(classify_http_status(502), ErrorClass::Upstream);
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(parse_retry_after(Some("30")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(Some(" 5 ")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_upstream_body_is_truncated() {
        let body = "x".repeat(2000);
        match ProviderError::from_status(500, None, &body) {
            ProviderError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        match ProviderError::from_status(429, Some("12"), "slow down") {
            ProviderError::RateLimited { retry_after, body } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)));
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
