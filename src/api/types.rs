//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::orchestrator::{BattleCreated, LaunchedAgent};
use crate::providers::ProviderKind;
use crate::rating::SkillRating;
use crate::store::{AgentResult, AgentRun, AgentStatus, Session};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// Providers with a registered adapter
    pub providers: Vec<ProviderKind>,
}

/// `instruction` stays untyped so a non-string value reaches the validator as missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBattleRequest {
    #[serde(default)]
    pub instruction: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    #[serde(rename = "type")]
    pub provider: ProviderKind,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
}

impl From<LaunchedAgent> for AgentSummary {
    fn from(agent: LaunchedAgent) -> Self {
        Self {
            provider: agent.provider,
            agent_id: agent.agent_id,
            model: agent.model,
            live_url: agent.live_view_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleAgents {
    pub agent_a: AgentSummary,
    pub agent_b: AgentSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBattleResponse {
    pub battle_id: String,
    pub session_id: String,
    pub same_framework: bool,
    pub agents: BattleAgents,
}

impl From<BattleCreated> for CreateBattleResponse {
    fn from(created: BattleCreated) -> Self {
        Self {
            battle_id: created.battle_id,
            session_id: created.session_id,
            same_framework: created.same_framework,
            agents: BattleAgents {
                agent_a: created.agent_a.into(),
                agent_b: created.agent_b.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub battle_id: String,
    pub vote_type: String,
    #[serde(default)]
    pub winner_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAgentRequest {
    pub session_id: String,
    #[serde(default)]
    pub instruction: Option<Value>,
    #[serde(default)]
    pub provider_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAgentResponse {
    pub session_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
}

/// Status report sent by a remote agent server for a run it owns.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusUpdate {
    pub status: AgentStatus,
    #[serde(default)]
    pub result: Option<AgentResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub elapsed_secs: Option<f64>,
    #[serde(default)]
    pub live_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingUpdate {
    pub recording_url: String,
}

/// Whether a write-once or forward-only update took effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: Session,
    pub agents: Vec<AgentRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub ratings: Vec<SkillRating>,
}

/// Extract a string instruction; anything else counts as missing.
pub fn instruction_text(value: &Option<Value>) -> Option<&str> {
    value.as_ref().and_then(Value::as_str)
}
