//! Arena storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database
//!
//! Every backend enforces the same record invariants: agent status only moves
//! forward, live-view and recording URLs are write-once, and a battle's vote
//! is recorded exactly once together with its rating update.

mod memory;
mod sqlite;

pub use memory::InMemoryArenaStore;
pub use sqlite::SqliteArenaStore;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cost::{CostBreakdown, UsageSummary};
use crate::providers::ProviderKind;
use crate::rating::{Outcome, RatingDeltas, SkillRating};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("Battle {0} already has a vote")]
    AlreadyVoted(String),

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Lifecycle of one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(AgentStatus::Initializing),
            "running" => Some(AgentStatus::Running),
            "completed" => Some(AgentStatus::Completed),
            "failed" => Some(AgentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            AgentStatus::Initializing => 0,
            AgentStatus::Running => 1,
            AgentStatus::Completed | AgentStatus::Failed => 2,
        }
    }

    /// Check a status write against the forward-only rule.
    ///
    /// Returns `Ok(false)` when the write is a no-op (same non-terminal status).
    pub fn check_transition(self, to: AgentStatus) -> Result<bool, StoreError> {
        if self.is_terminal() || to.rank() < self.rank() {
            return Err(StoreError::InvalidTransition { from: self, to });
        }
        Ok(self != to)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's request; groups the agent runs launched for one instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub instruction: String,
    pub is_private: bool,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_agent_id: Option<String>,
}

/// Structured outcome of a finished agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub provider: ProviderKind,
    pub success: bool,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    pub cost: CostBreakdown,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<Value>,
    #[serde(default)]
    pub actions: Vec<Value>,
    /// The provider's own terminal status string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One provider's execution of a session's instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub id: String,
    pub session_id: String,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub status: AgentStatus,
    pub steps: u32,
    pub elapsed_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    /// Task id or browser session id at the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a new agent run.
#[derive(Debug, Clone)]
pub struct NewAgentRun {
    pub session_id: String,
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub live_view_url: Option<String>,
    pub external_session_id: Option<String>,
}

impl NewAgentRun {
    pub fn new(session_id: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            session_id: session_id.into(),
            provider,
            model: None,
            live_view_url: None,
            external_session_id: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_live_view_url(mut self, url: Option<String>) -> Self {
        self.live_view_url = url;
        self
    }

    pub fn with_external_session_id(mut self, id: Option<String>) -> Self {
        self.external_session_id = id;
        self
    }
}

/// Terminal write for an agent run.
#[derive(Debug, Clone)]
pub struct AgentCompletion {
    pub status: AgentStatus,
    pub result: Option<AgentResult>,
    pub error: Option<String>,
    pub steps: Option<u32>,
    pub elapsed_secs: Option<f64>,
}

impl AgentCompletion {
    pub fn completed(result: AgentResult) -> Self {
        Self {
            status: AgentStatus::Completed,
            elapsed_secs: Some(result.duration_secs),
            result: Some(result),
            error: None,
            steps: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            result: None,
            error: Some(error.into()),
            steps: None,
            elapsed_secs: None,
        }
    }

    pub fn with_result(mut self, result: AgentResult) -> Self {
        self.elapsed_secs = Some(result.duration_secs);
        self.result = Some(result);
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }
}

/// One participant of a battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleAgent {
    pub agent_id: String,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl BattleAgent {
    pub fn rating_key(&self) -> crate::rating::RatingKey {
        crate::rating::RatingKey::new(self.provider.as_str(), self.model.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Vote {
    Winner {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    Tie,
    BothBad,
}

impl Vote {
    pub fn kind(&self) -> &'static str {
        match self {
            Vote::Winner { .. } => "winner",
            Vote::Tie => "tie",
            Vote::BothBad => "both_bad",
        }
    }
}

/// Two agent runs of one session competing on the same instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub instruction: String,
    pub agent_a: BattleAgent,
    pub agent_b: BattleAgent,
    pub same_framework: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<Vote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voted_at: Option<String>,
    pub created_at: String,
}

impl Battle {
    /// Map a vote onto agent A's outcome.
    pub fn outcome_for(&self, vote: &Vote) -> Result<Outcome, StoreError> {
        match vote {
            Vote::Winner { agent_id } if *agent_id == self.agent_a.agent_id => Ok(Outcome::AWins),
            Vote::Winner { agent_id } if *agent_id == self.agent_b.agent_id => Ok(Outcome::BWins),
            Vote::Winner { agent_id } => Err(StoreError::InvalidVote(format!(
                "agent {} is not part of battle {}",
                agent_id, self.id
            ))),
            Vote::Tie => Ok(Outcome::Tie),
            Vote::BothBad => Ok(Outcome::BothBad),
        }
    }

    pub fn involves(&self, agent_id: &str) -> bool {
        self.agent_a.agent_id == agent_id || self.agent_b.agent_id == agent_id
    }
}

#[derive(Debug, Clone)]
pub struct NewBattle {
    pub user_id: String,
    pub session_id: String,
    pub instruction: String,
    pub agent_a: BattleAgent,
    pub agent_b: BattleAgent,
    pub same_framework: bool,
}

/// Result of a recorded vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub battle_id: String,
    pub vote: Vote,
    pub rating_deltas: RatingDeltas,
}

/// Arena store trait - implemented by all storage backends.
#[async_trait]
pub trait ArenaStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    async fn create_session(
        &self,
        user_id: &str,
        instruction: &str,
        is_private: bool,
    ) -> Result<Session, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Sessions of one user, newest first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError>;

    /// Create an agent run in `initializing`. Fails with `NotFound` for an unknown session.
    async fn create_agent_run(&self, run: NewAgentRun) -> Result<AgentRun, StoreError>;

    async fn get_agent_run(&self, id: &str) -> Result<Option<AgentRun>, StoreError>;

    /// Agent runs of a session, oldest first.
    async fn list_agent_runs(&self, session_id: &str) -> Result<Vec<AgentRun>, StoreError>;

    /// Move a run to a non-terminal status. Same-status writes are no-ops.
    async fn update_agent_status(&self, id: &str, status: AgentStatus) -> Result<(), StoreError>;

    /// Write-once; returns `false` if a URL was already set.
    async fn set_live_view_url(&self, id: &str, url: &str) -> Result<bool, StoreError>;

    /// Terminal write. Marks the session complete once all its runs are terminal.
    async fn complete_agent_run(
        &self,
        id: &str,
        completion: AgentCompletion,
    ) -> Result<(), StoreError>;

    /// Write-once; returns `false` if a URL was already set.
    async fn set_recording_url(&self, id: &str, url: &str) -> Result<bool, StoreError>;

    async fn create_battle(&self, battle: NewBattle) -> Result<Battle, StoreError>;

    async fn get_battle(&self, id: &str) -> Result<Option<Battle>, StoreError>;

    /// Atomically record a vote and apply its rating update.
    ///
    /// A battle that already carries a vote fails with `AlreadyVoted` and is left unchanged.
    async fn record_vote(
        &self,
        battle_id: &str,
        vote: Vote,
        k_factor: f64,
    ) -> Result<VoteReceipt, StoreError>;

    /// All skill ratings, highest first.
    async fn list_skill_ratings(&self) -> Result<Vec<SkillRating>, StoreError>;
}

/// Store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    Memory,
    #[default]
    Sqlite,
}

impl StoreType {
    /// Parse from environment variable value.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Create an arena store based on type and configuration.
pub async fn create_arena_store(
    store_type: StoreType,
    data_dir: PathBuf,
) -> Result<Arc<dyn ArenaStore>, StoreError> {
    match store_type {
        StoreType::Memory => Ok(Arc::new(InMemoryArenaStore::new())),
        StoreType::Sqlite => {
            let store = SqliteArenaStore::new(data_dir.join("arena.db")).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        use AgentStatus::*;
        assert_eq!(Initializing.check_transition(Running), Ok(true));
        assert_eq!(Initializing.check_transition(Completed), Ok(true));
        assert_eq!(Running.check_transition(Failed), Ok(true));
        assert_eq!(Running.check_transition(Running), Ok(false));
    }

    #[test]
    fn backward_and_post_terminal_transitions_are_rejected() {
        use AgentStatus::*;
        assert!(Running.check_transition(Initializing).is_err());
        for from in [Completed, Failed] {
            for to in [Initializing, Running, Completed, Failed] {
                assert_eq!(
                    from.check_transition(to),
                    Err(StoreError::InvalidTransition { from, to })
                );
            }
        }
    }

    #[test]
    fn vote_serializes_with_type_tag() {
        let vote = Vote::Winner {
            agent_id: "a1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&vote).unwrap(),
            serde_json::json!({ "type": "winner", "agentId": "a1" })
        );
        assert_eq!(
            serde_json::to_value(Vote::BothBad).unwrap(),
            serde_json::json!({ "type": "both_bad" })
        );
    }
}
