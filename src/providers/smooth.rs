//! Submit-then-poll provider backed by a remote task API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::tracker::{CompletionTracker, TrackerPolicy};
use super::{LaunchOutcome, LaunchRequest, ProviderAdapter, ProviderError, ProviderKind};
use crate::config::SmoothConfig;
use crate::cost::{browser_cost, credits_cost, CostBreakdown, UsageSummary};
use crate::store::{AgentCompletion, AgentResult, AgentStatus, ArenaStore, NewAgentRun};

/// Task API client. Cheap to clone; the tracker keeps its own copy.
#[derive(Clone)]
pub struct SmoothClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedTask {
    pub id: String,
    #[serde(default)]
    pub live_url: Option<String>,
}

/// Task state as reported by the task API.
#[derive(Debug, Clone, Deserialize)]
pub struct SmoothTask {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub credits_used: Option<f64>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub live_url: Option<String>,
    /// Seconds the task ran
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub created_at: Option<Value>,
}

impl SmoothTask {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "done" | "failed" | "cancelled")
    }

    pub fn succeeded(&self) -> bool {
        self.status == "done"
    }

    /// Build the run result. `elapsed` stands in when the API reports no duration.
    pub fn to_result(&self, elapsed: Duration) -> AgentResult {
        let duration_secs = self
            .duration
            .filter(|d| *d > 0.0)
            .unwrap_or_else(|| elapsed.as_secs_f64());
        let credits = self.credits_used.unwrap_or(0.0);
        let cost = CostBreakdown::new(credits_cost(credits), browser_cost(duration_secs));

        let final_result = match &self.output {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let extraction = match &self.output {
            Some(v @ (Value::Object(_) | Value::Array(_))) => Some(v.clone()),
            _ => None,
        };

        AgentResult {
            provider: ProviderKind::Smooth,
            success: self.succeeded(),
            completed: self.succeeded(),
            final_result,
            duration_secs,
            usage: Some(UsageSummary::from_credits(credits)),
            cost,
            extraction,
            actions: Vec::new(),
            status: Some(self.status.clone()),
        }
    }
}

impl SmoothClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &SmoothConfig) -> Option<Self> {
        config
            .api_key
            .as_ref()
            .map(|key| Self::new(config.api_url.clone(), key.clone()))
    }

    pub async fn submit(&self, task: &str) -> Result<SubmittedTask, ProviderError> {
        let response = self
            .client
            .post(format!("{}/task", self.base_url))
            .header("apikey", &self.api_key)
            .json(&json!({ "task": task, "device": "desktop" }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<SmoothTask, ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/task/{}",
                self.base_url,
                urlencoding::encode(task_id)
            ))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

pub struct SmoothAdapter {
    client: Option<SmoothClient>,
    store: Arc<dyn ArenaStore>,
    tracker: CompletionTracker,
    policy: TrackerPolicy,
}

impl SmoothAdapter {
    pub fn new(
        client: Option<SmoothClient>,
        store: Arc<dyn ArenaStore>,
        tracker: CompletionTracker,
        policy: TrackerPolicy,
    ) -> Self {
        Self {
            client,
            store,
            tracker,
            policy,
        }
    }
}

#[async_trait]
impl ProviderAdapter for SmoothAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Smooth
    }

    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, ProviderError> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| ProviderError::Misconfigured("SMOOTH_API_KEY is not set".to_string()))?;

        let submitted = client.submit(&request.instruction).await?;
        tracing::info!(task_id = %submitted.id, session_id = %request.session_id, "Submitted smooth task");

        let run = self
            .store
            .create_agent_run(
                NewAgentRun::new(&request.session_id, ProviderKind::Smooth)
                    .with_model(request.model.clone())
                    .with_live_view_url(submitted.live_url.clone())
                    .with_external_session_id(Some(submitted.id.clone())),
            )
            .await?;

        if let Err(e) = self
            .store
            .update_agent_status(&run.id, AgentStatus::Running)
            .await
        {
            self.tracker
                .finish(&run.id, AgentCompletion::failed(format!("Failed to start tracking: {}", e)))
                .await;
            return Err(e.into());
        }

        self.tracker
            .track_task(run.id.clone(), submitted.id, client, self.policy.clone());

        Ok(LaunchOutcome {
            agent_run_id: run.id,
            live_view_url: submitted.live_url,
            browser_session_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: &str, output: Option<Value>) -> SmoothTask {
        SmoothTask {
            id: "t1".to_string(),
            status: status.to_string(),
            output,
            credits_used: Some(10.0),
            recording_url: None,
            live_url: None,
            duration: Some(1800.0),
            created_at: None,
        }
    }

    #[test]
    fn done_task_costs_credits_plus_browser_time() {
        let result = task("done", Some(json!("found it"))).to_result(Duration::from_secs(5));
        assert!(result.completed);
        assert!(result.success);
        assert_eq!(result.final_result.as_deref(), Some("found it"));
        assert!((result.cost.llm_cost - 0.1).abs() < 1e-9);
        assert!((result.cost.browser_cost - 0.1).abs() < 1e-9);
        assert!((result.cost.total_cost - 0.2).abs() < 1e-9);
        assert_eq!(result.usage.unwrap().credits, Some(10.0));
    }

    #[test]
    fn structured_output_becomes_extraction() {
        let result = task("done", Some(json!({ "price": 12 }))).to_result(Duration::ZERO);
        assert_eq!(result.extraction, Some(json!({ "price": 12 })));
    }

    #[test]
    fn missing_duration_falls_back_to_elapsed() {
        let mut t = task("failed", None);
        t.duration = None;
        let result = t.to_result(Duration::from_secs(36));
        assert_eq!(result.duration_secs, 36.0);
        assert!(!result.completed);
        assert!(t.is_terminal());
        assert!(!task("running", None).is_terminal());
    }
}
