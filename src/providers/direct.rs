//! Direct-remote providers: one authenticated call hands the job to a remote agent server.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{LaunchOutcome, LaunchRequest, ProviderAdapter, ProviderError, ProviderKind};
use crate::store::{AgentCompletion, AgentStatus, ArenaStore, NewAgentRun, StoreError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteLaunchBody<'a> {
    agent_id: &'a str,
    session_id: &'a str,
    instruction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    browser_session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cdp_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_view_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteLaunchResponse {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    live_url: Option<String>,
    #[serde(default)]
    browser_session_id: Option<String>,
}

pub struct DirectRemoteAdapter {
    kind: ProviderKind,
    client: Client,
    endpoint: Option<String>,
    server_token: Option<String>,
    store: Arc<dyn ArenaStore>,
}

impl DirectRemoteAdapter {
    pub fn new(
        kind: ProviderKind,
        endpoint: Option<String>,
        server_token: Option<String>,
        store: Arc<dyn ArenaStore>,
    ) -> Self {
        Self {
            kind,
            client: Client::new(),
            endpoint,
            server_token,
            store,
        }
    }
}

#[async_trait]
impl ProviderAdapter for DirectRemoteAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, ProviderError> {
        let token = self.server_token.as_deref().ok_or_else(|| {
            ProviderError::Misconfigured("AGENT_SERVER_TOKEN is not set".to_string())
        })?;
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            ProviderError::Misconfigured(format!("No endpoint configured for {}", self.kind))
        })?;

        let browser = request.browser.as_ref();
        let browser_session_id = browser.map(|b| b.id.clone());

        // The run exists before the remote hears of it, so early status callbacks find it.
        let run = self
            .store
            .create_agent_run(
                NewAgentRun::new(&request.session_id, self.kind)
                    .with_model(request.model.clone())
                    .with_live_view_url(browser.and_then(|b| b.live_view_url.clone()))
                    .with_external_session_id(browser_session_id.clone()),
            )
            .await?;

        let body = RemoteLaunchBody {
            agent_id: &run.id,
            session_id: &request.session_id,
            instruction: &request.instruction,
            provider_model: request.model.as_deref(),
            user_id: request.user_id.as_deref(),
            browser_session_id: browser_session_id.as_deref(),
            cdp_url: browser.map(|b| b.cdp_url.as_str()),
            live_view_url: browser.and_then(|b| b.live_view_url.as_deref()),
        };

        let launched = match self.send(endpoint, token, &body).await {
            Ok(launched) => launched,
            Err(e) => {
                self.fail_run(&run.id, &e).await;
                return Err(e);
            }
        };
        if let Some(remote_id) = launched.agent_id.as_deref().filter(|id| *id != run.id) {
            tracing::warn!(agent_id = %run.id, remote_id = %remote_id, provider = %self.kind, "Remote answered with a different agent id; keeping ours");
        }

        // The remote may already have reported progress; Running must not move it back.
        match self
            .store
            .update_agent_status(&run.id, AgentStatus::Running)
            .await
        {
            Ok(()) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::debug!(agent_id = %run.id, status = %from, "Remote already finished the run");
            }
            Err(e) => return Err(e.into()),
        }

        let live_view_url = match launched.live_url {
            Some(url) => {
                self.store.set_live_view_url(&run.id, &url).await?;
                Some(url)
            }
            None => browser.and_then(|b| b.live_view_url.clone()),
        };

        tracing::info!(agent_id = %run.id, provider = %self.kind, "Remote agent launched");
        Ok(LaunchOutcome {
            agent_run_id: run.id,
            live_view_url,
            browser_session_id: launched.browser_session_id.or(browser_session_id),
        })
    }
}

impl DirectRemoteAdapter {
    async fn send(
        &self,
        endpoint: &str,
        token: &str,
        body: &RemoteLaunchBody<'_>,
    ) -> Result<RemoteLaunchResponse, ProviderError> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn fail_run(&self, agent_id: &str, err: &ProviderError) {
        let completion = AgentCompletion::failed(format!("Launch request failed: {}", err));
        if let Err(e) = self.store.complete_agent_run(agent_id, completion).await {
            tracing::error!(agent_id = %agent_id, "Failed to mark run as failed: {}", e);
        }
    }
}
