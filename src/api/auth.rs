//! Bearer authentication at the HTTP boundary.
//!
//! - Callers send `Authorization: Bearer <jwt>` (HS256, `sub` = user id)
//! - Remote agent servers send `Authorization: Bearer <AGENT_SERVER_TOKEN>` on callback routes
//! - `DEV_MODE=true` skips both checks; every caller is `dev-user`
//!
//! A missing or invalid caller token does not reject the request here. The
//! resolved `Option<Caller>` travels to the handlers so input validation still
//! runs first.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use super::error::ApiError;
use super::routes::AppState;
use crate::config::Config;
use crate::error::ArenaError;
use crate::orchestrator::Caller;

pub const DEV_USER_ID: &str = "dev-user";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    /// User id
    sub: String,
    /// Issued-at unix seconds
    iat: i64,
    /// Expiration unix seconds
    exp: i64,
}

/// Caller resolved by [`attach_caller`]; `None` when unauthenticated.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Sign a caller token. Used by operators and tests; the login flow lives elsewhere.
pub fn issue_jwt(secret: &str, user_id: &str, ttl_days: i64) -> anyhow::Result<String> {
    let now = Utc::now();
    let exp = now + Duration::days(ttl_days.max(1));
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

fn verify_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller from request headers.
pub fn resolve_caller(headers: &HeaderMap, config: &Config) -> Option<Caller> {
    if config.dev_mode {
        return Some(Caller::new(DEV_USER_ID));
    }
    let secret = config.jwt_secret.as_deref()?;
    let token = bearer_token(headers)?;
    match verify_jwt(token, secret) {
        Ok(claims) => Some(Caller::new(claims.sub)),
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            None
        }
    }
}

pub async fn attach_caller(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let caller = resolve_caller(req.headers(), &state.config);
    req.extensions_mut().insert(MaybeCaller(caller));
    next.run(req).await
}

/// Guard for routes only the remote agent servers may call.
pub async fn require_service_token(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.config.dev_mode {
        return next.run(req).await;
    }

    // Fail closed when no service token is configured.
    let expected = match state.config.direct.server_token.as_deref() {
        Some(token) => token,
        None => {
            return ApiError(ArenaError::Misconfigured(
                "AGENT_SERVER_TOKEN not configured".to_string(),
            ))
            .into_response();
        }
    };

    match bearer_token(req.headers()) {
        Some(token) if constant_time_eq(token, expected) => next.run(req).await,
        _ => ApiError(ArenaError::Unauthenticated).into_response(),
    }
}
