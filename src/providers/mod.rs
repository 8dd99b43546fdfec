//! Browser-agent providers and the uniform launch contract.
//!
//! Three execution styles exist:
//! - direct-remote: one authenticated request, the remote service owns the run afterwards
//! - submit-then-poll: submit a task, then track it in the background until it is terminal
//! - bounded-step: run a local LLM step loop against a remote browser in the background

mod bounded_step;
mod direct;
mod error;
mod registry;
mod smooth;
mod tracker;

pub use bounded_step::{
    build_result, enforce_result_size, BoundedStepAdapter, StepLoop, StepLoopOutput,
    RESULT_SIZE_LIMIT,
};
pub use direct::DirectRemoteAdapter;
pub use error::{classify_http_status, parse_retry_after, ErrorClass, ProviderError};
pub use registry::AdapterRegistry;
pub use smooth::{SmoothAdapter, SmoothClient, SmoothTask, SubmittedTask};
pub use tracker::{CompletionTracker, TrackerPolicy};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::BrowserSession;

/// Closed set of providers the arena can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Stagehand,
    Notte,
    Smooth,
    BrowserUse,
}

/// How a provider's job is executed and tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderBehavior {
    DirectRemote,
    SubmitThenPoll,
    BoundedStep,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Stagehand,
        ProviderKind::Notte,
        ProviderKind::Smooth,
        ProviderKind::BrowserUse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stagehand => "stagehand",
            ProviderKind::Notte => "notte",
            ProviderKind::Smooth => "smooth",
            ProviderKind::BrowserUse => "browser-use",
        }
    }

    pub fn behavior(&self) -> ProviderBehavior {
        match self {
            ProviderKind::Stagehand | ProviderKind::Notte => ProviderBehavior::DirectRemote,
            ProviderKind::Smooth => ProviderBehavior::SubmitThenPoll,
            ProviderKind::BrowserUse => ProviderBehavior::BoundedStep,
        }
    }

    /// Whether the orchestrator must acquire a remote browser before launch.
    pub fn needs_browser_session(&self) -> bool {
        matches!(self, ProviderKind::Stagehand | ProviderKind::BrowserUse)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stagehand" => Ok(ProviderKind::Stagehand),
            "notte" => Ok(ProviderKind::Notte),
            "smooth" => Ok(ProviderKind::Smooth),
            "browser-use" | "browser_use" | "browseruse" => Ok(ProviderKind::BrowserUse),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// One entry of the matchmaking pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: Option<String>) -> Self {
        Self { kind, model }
    }
}

/// Split a `provider/model` hint into the LLM provider and model name.
///
/// An `openrouter/` prefix is kept as the provider and the rest is the model.
/// An empty hint yields the browser-use house model.
pub fn parse_provider_model(hint: Option<&str>) -> (String, String) {
    let hint = hint.map(str::trim).unwrap_or_default();
    if hint.is_empty() {
        return ("browser-use".to_string(), "bu-1.0".to_string());
    }
    if let Some(rest) = hint.strip_prefix("openrouter/") {
        return ("openrouter".to_string(), rest.to_string());
    }
    match hint.split_once('/') {
        Some((provider, model)) => (provider.to_string(), model.to_string()),
        None => (hint.to_string(), hint.to_string()),
    }
}

/// Input to one adapter launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub session_id: String,
    pub instruction: String,
    pub model: Option<String>,
    pub user_id: Option<String>,
    /// Remote browser acquired by the orchestrator, if the provider needs one
    pub browser: Option<BrowserSession>,
}

/// What a successful launch hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOutcome {
    pub agent_run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_session_id: Option<String>,
}

/// Uniform launch contract implemented by every provider.
///
/// Once `launch` has created an agent run, every later failure of that run
/// must end in a terminal `failed` status.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, ProviderError>;
}
