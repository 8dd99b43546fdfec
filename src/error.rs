//! Arena-level errors and the fixed error-code vocabulary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matchmaker::MatchmakingError;
use crate::providers::{ProviderError, ProviderKind};
use crate::store::StoreError;

/// Outcome of one side of a launch, reported when the battle could not start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSideDetail {
    pub provider: ProviderKind,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl LaunchSideDetail {
    pub fn succeeded(provider: ProviderKind, agent_id: impl Into<String>) -> Self {
        Self {
            provider,
            ok: true,
            agent_id: Some(agent_id.into()),
            error: None,
            code: None,
        }
    }

    pub fn failed(provider: ProviderKind, error: &ArenaError) -> Self {
        Self {
            provider,
            ok: false,
            agent_id: None,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Server misconfigured: {0}")]
    Misconfigured(String),

    #[error("Matchmaking failed: {0}")]
    Matchmaking(String),

    #[error(transparent)]
    Provider(ProviderError),

    #[error("Agent launch timed out after {0}s")]
    LaunchTimeout(u64),

    #[error("Failed to launch both agents")]
    LaunchFailed { details: Vec<LaunchSideDetail> },

    #[error("This battle already has a vote")]
    AlreadyVoted,

    #[error(transparent)]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArenaError {
    pub fn code(&self) -> &'static str {
        match self {
            ArenaError::Validation(_) => "VALIDATION_ERROR",
            ArenaError::Unauthenticated => "UNAUTHENTICATED",
            ArenaError::Forbidden(_) => "FORBIDDEN",
            ArenaError::NotFound(_) => "NOT_FOUND",
            ArenaError::Misconfigured(_) => "SERVER_MISCONFIGURED",
            ArenaError::Matchmaking(_) => "MATCHMAKING_FAILED",
            ArenaError::Provider(ProviderError::InvalidCredential { .. }) => {
                "PROVIDER_INVALID_CREDENTIAL"
            }
            ArenaError::Provider(ProviderError::RateLimited { .. }) => "PROVIDER_RATE_LIMITED",
            ArenaError::Provider(_) => "PROVIDER_ERROR",
            ArenaError::LaunchTimeout(_) => "LAUNCH_TIMEOUT",
            ArenaError::LaunchFailed { .. } => "LAUNCH_FAILED",
            ArenaError::AlreadyVoted => "ALREADY_VOTED",
            ArenaError::Store(_) | ArenaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ArenaError::Validation(_) => 400,
            ArenaError::Unauthenticated => 401,
            ArenaError::Forbidden(_) => 403,
            ArenaError::NotFound(_) => 404,
            ArenaError::AlreadyVoted => 409,
            ArenaError::Provider(ProviderError::RateLimited { .. }) => 429,
            ArenaError::Provider(ProviderError::InvalidCredential { .. })
            | ArenaError::Provider(ProviderError::Upstream { .. })
            | ArenaError::Provider(ProviderError::Network(_))
            | ArenaError::Provider(ProviderError::InvalidResponse(_)) => 502,
            ArenaError::LaunchTimeout(_) => 504,
            _ => 500,
        }
    }
}

impl From<StoreError> for ArenaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ArenaError::NotFound(what),
            StoreError::AlreadyVoted(_) => ArenaError::AlreadyVoted,
            StoreError::InvalidVote(msg) => ArenaError::Validation(msg),
            err @ StoreError::InvalidTransition { .. } => ArenaError::Validation(err.to_string()),
            other => ArenaError::Store(other),
        }
    }
}

impl From<ProviderError> for ArenaError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Misconfigured(msg) => ArenaError::Misconfigured(msg),
            ProviderError::Store(store) => store.into(),
            other => ArenaError::Provider(other),
        }
    }
}

impl From<MatchmakingError> for ArenaError {
    fn from(err: MatchmakingError) -> Self {
        ArenaError::Matchmaking(err.to_string())
    }
}
