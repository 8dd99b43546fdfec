//! # Agent Arena
//!
//! Head-to-head battles between browser-automation agents.
//!
//! A user submits an instruction, two providers run it concurrently, the user
//! votes on the better outcome and the vote updates a per-(provider, model)
//! skill rating.
//!
//! ## Battle Flow
//!
//! ```text
//!   instruction ──► validation ──► matchmaker ──► orchestrator
//!                                                   │       │
//!                                          adapter A│       │adapter B
//!                                                   ▼       ▼
//!                                        ┌──────────────────────────┐
//!                                        │  store (sessions, runs)  │◄── completion tracker
//!                                        └──────────────────────────┘
//!                                                   ▲
//!                                          vote ──► ledger ──► ratings
//! ```
//!
//! ## Modules
//! - `validation`: instruction checks before anything is launched
//! - `matchmaker`: picks the two competing provider configurations
//! - `providers`: adapters for each provider and the background completion tracker
//! - `orchestrator`: launches both sides and records the battle
//! - `ledger`: exactly-once voting
//! - `rating`: Elo update for a vote
//! - `cost`: token, credit and browser-hour pricing
//! - `store`: persistence behind the `ArenaStore` trait
//! - `browser`: remote browser sessions and the CDP driver
//! - `llm`: chat-completions client for the local step loop
//! - `api`: HTTP surface

pub mod api;
pub mod browser;
pub mod config;
pub mod cost;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod matchmaker;
pub mod orchestrator;
pub mod providers;
pub mod rating;
pub mod store;
pub mod util;
pub mod validation;

pub use config::Config;
pub use error::ArenaError;
pub use orchestrator::{Caller, Orchestrator};
