//! HTTP API for the arena.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check with the registered providers
//! - `GET /leaderboard` - Skill ratings, highest first
//! - `POST /battle/create` - Validate, match two providers and launch both
//! - `POST /battle/vote` - Vote on a battle (once)
//! - `GET /battle/{id}` - Battle record
//! - `POST /agent/{provider}` - Launch one provider into an existing session
//! - `GET /session/{id}` - Session with its agent runs
//! - `POST /agent/{id}/status` - Status report from a remote agent server
//! - `POST /agent/{id}/recording` - Write-once recording URL

pub mod auth;
pub mod error;
mod routes;
pub mod types;

pub use error::ApiError;
pub use routes::{router, serve, AppState};
pub use types::*;
