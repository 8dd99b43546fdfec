//! Error envelope for caller-facing responses.
//!
//! Every failure carries a fresh correlation id that is also logged, so a
//! support request can be matched to the server log line.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::ArenaError;
use crate::store::StoreError;
use crate::util::{redact_secrets, redact_text};

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub ArenaError);

impl From<ArenaError> for ApiError {
    fn from(err: ArenaError) -> Self {
        ApiError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(ArenaError::Validation(rejection.body_text()))
    }
}

impl ApiError {
    fn details(&self) -> Option<Value> {
        match &self.0 {
            ArenaError::LaunchFailed { details } => serde_json::to_value(details).ok(),
            ArenaError::Provider(crate::providers::ProviderError::RateLimited {
                retry_after: Some(after),
                ..
            }) => Some(serde_json::json!({ "retryAfterSecs": after.as_secs() })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.0.code();
        let message = redact_text(&self.0.to_string());

        if status.is_server_error() {
            tracing::error!(correlation_id = %correlation_id, code, "{}", message);
        } else {
            tracing::warn!(correlation_id = %correlation_id, code, "{}", message);
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody { code, message },
            details: self.details().map(redact_secrets),
            correlation_id,
        };
        (status, Json(envelope)).into_response()
    }
}
