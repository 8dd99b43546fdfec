//! Launch orchestration: validate, pick a pair, start both agents, record the battle.
//!
//! The two launches run on their own spawned tasks with a per-launch timeout.
//! A timed-out launch is abandoned, not aborted, so a run it already created
//! still reaches a terminal status through the adapter's own completion path.
//! Nothing is rolled back when only one side succeeds.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::{BrowserSession, BrowserSessionProvider};
use crate::error::{ArenaError, LaunchSideDetail};
use crate::matchmaker::Matchmaker;
use crate::providers::{
    AdapterRegistry, LaunchOutcome, LaunchRequest, ProviderConfig, ProviderError, ProviderKind,
};
use crate::store::{ArenaStore, BattleAgent, NewBattle};
use crate::validation::{InstructionValidator, Validation};

/// Authenticated user on whose behalf a request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchedAgent {
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_view_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_session_id: Option<String>,
}

impl LaunchedAgent {
    fn new(config: &ProviderConfig, outcome: LaunchOutcome) -> Self {
        Self {
            provider: config.kind,
            model: config.model.clone(),
            agent_id: outcome.agent_run_id,
            live_view_url: outcome.live_view_url,
            browser_session_id: outcome.browser_session_id,
        }
    }

    fn battle_agent(&self) -> BattleAgent {
        BattleAgent {
            agent_id: self.agent_id.clone(),
            provider: self.provider,
            model: self.model.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleCreated {
    pub battle_id: String,
    pub session_id: String,
    pub same_framework: bool,
    pub agent_a: LaunchedAgent,
    pub agent_b: LaunchedAgent,
}

pub struct Orchestrator {
    store: Arc<dyn ArenaStore>,
    adapters: Arc<AdapterRegistry>,
    matchmaker: Arc<Matchmaker>,
    browsers: Option<Arc<dyn BrowserSessionProvider>>,
    validator: InstructionValidator,
    launch_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ArenaStore>,
        adapters: Arc<AdapterRegistry>,
        matchmaker: Arc<Matchmaker>,
        browsers: Option<Arc<dyn BrowserSessionProvider>>,
        validator: InstructionValidator,
        launch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            adapters,
            matchmaker,
            browsers,
            validator,
            launch_timeout,
        }
    }

    /// Start a two-agent battle for the caller's instruction.
    pub async fn create_battle(
        &self,
        caller: Option<&Caller>,
        instruction: Option<&str>,
    ) -> Result<BattleCreated, ArenaError> {
        let instruction = self.validate(instruction)?;
        let caller = caller.ok_or(ArenaError::Unauthenticated)?;
        let pair = self.matchmaker.select_pair()?;

        let (session, browser_a, browser_b) = tokio::join!(
            self.store.create_session(&caller.user_id, &instruction, false),
            self.acquire_browser(pair.a.kind),
            self.acquire_browser(pair.b.kind),
        );
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                for browser in [browser_a, browser_b].into_iter().flatten().flatten() {
                    self.release_browser(&browser).await;
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            session_id = %session.id,
            agent_a = %pair.a.kind,
            agent_b = %pair.b.kind,
            same_framework = pair.same_framework,
            "Launching battle"
        );

        let (side_a, side_b) = tokio::join!(
            self.launch_side(&pair.a, &session.id, &instruction, &caller.user_id, browser_a),
            self.launch_side(&pair.b, &session.id, &instruction, &caller.user_id, browser_b),
        );

        let (agent_a, agent_b) = match (side_a, side_b) {
            (Ok(a), Ok(b)) => (a, b),
            (side_a, side_b) => {
                let details = vec![
                    side_detail(pair.a.kind, &side_a),
                    side_detail(pair.b.kind, &side_b),
                ];
                for agent in [side_a.ok(), side_b.ok()].into_iter().flatten() {
                    tracing::warn!(
                        session_id = %session.id,
                        agent_id = %agent.agent_id,
                        provider = %agent.provider,
                        "Battle aborted; launched agent run is left in place"
                    );
                }
                return Err(ArenaError::LaunchFailed { details });
            }
        };

        let battle = self
            .store
            .create_battle(NewBattle {
                user_id: caller.user_id.clone(),
                session_id: session.id.clone(),
                instruction: instruction.clone(),
                agent_a: agent_a.battle_agent(),
                agent_b: agent_b.battle_agent(),
                same_framework: pair.same_framework,
            })
            .await?;

        tracing::info!(battle_id = %battle.id, session_id = %session.id, "Battle created");
        Ok(BattleCreated {
            battle_id: battle.id,
            session_id: session.id,
            same_framework: pair.same_framework,
            agent_a,
            agent_b,
        })
    }

    /// Launch one provider into an existing session owned by the caller.
    pub async fn launch_single(
        &self,
        caller: Option<&Caller>,
        provider: ProviderKind,
        session_id: &str,
        instruction: Option<&str>,
        model: Option<String>,
    ) -> Result<LaunchedAgent, ArenaError> {
        let instruction = self.validate(instruction)?;
        let caller = caller.ok_or(ArenaError::Unauthenticated)?;

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| ArenaError::NotFound(format!("Session {}", session_id)))?;
        if session.user_id != caller.user_id {
            return Err(ArenaError::Forbidden(
                "Session belongs to another user".to_string(),
            ));
        }

        let config = ProviderConfig::new(provider, model);
        let browser = self.acquire_browser(provider).await;
        self.launch_side(&config, &session.id, &instruction, &caller.user_id, browser)
            .await
    }

    fn validate(&self, instruction: Option<&str>) -> Result<String, ArenaError> {
        match self.validator.validate(instruction) {
            Validation::Valid => Ok(self.validator.sanitize(instruction.unwrap_or_default())),
            Validation::Invalid { reason } => Err(ArenaError::Validation(reason)),
        }
    }

    async fn acquire_browser(
        &self,
        kind: ProviderKind,
    ) -> Result<Option<BrowserSession>, ProviderError> {
        if !kind.needs_browser_session() {
            return Ok(None);
        }
        match &self.browsers {
            Some(browsers) => browsers.create_session().await.map(Some),
            None => Err(ProviderError::Misconfigured(format!(
                "{} needs a remote browser but none is configured",
                kind
            ))),
        }
    }

    async fn release_browser(&self, browser: &BrowserSession) {
        if let Some(browsers) = &self.browsers {
            if let Err(e) = browsers.release_session(&browser.id).await {
                tracing::warn!(browser_session_id = %browser.id, "Failed to release browser session: {}", e);
            }
        }
    }

    async fn launch_side(
        &self,
        config: &ProviderConfig,
        session_id: &str,
        instruction: &str,
        user_id: &str,
        browser: Result<Option<BrowserSession>, ProviderError>,
    ) -> Result<LaunchedAgent, ArenaError> {
        let browser = browser?;
        let adapter = match self.adapters.get(config.kind) {
            Some(adapter) => adapter,
            None => {
                if let Some(browser) = &browser {
                    self.release_browser(browser).await;
                }
                return Err(ArenaError::Misconfigured(format!(
                    "Provider {} is not available",
                    config.kind
                )));
            }
        };

        let request = LaunchRequest {
            session_id: session_id.to_string(),
            instruction: instruction.to_string(),
            model: config.model.clone(),
            user_id: Some(user_id.to_string()),
            browser: browser.clone(),
        };
        let handle = tokio::spawn(async move { adapter.launch(request).await });

        match tokio::time::timeout(self.launch_timeout, handle).await {
            Ok(Ok(Ok(outcome))) => Ok(LaunchedAgent::new(config, outcome)),
            Ok(Ok(Err(e))) => {
                tracing::warn!(provider = %config.kind, session_id = %session_id, "Launch failed: {}", e);
                if let Some(browser) = &browser {
                    self.release_browser(browser).await;
                }
                Err(e.into())
            }
            Ok(Err(join_err)) => {
                tracing::error!(provider = %config.kind, session_id = %session_id, "Launch task panicked: {}", join_err);
                if let Some(browser) = &browser {
                    self.release_browser(browser).await;
                }
                Err(ArenaError::Internal(format!("Launch task failed: {}", join_err)))
            }
            Err(_) => {
                tracing::warn!(
                    provider = %config.kind,
                    session_id = %session_id,
                    timeout_secs = self.launch_timeout.as_secs(),
                    "Launch timed out"
                );
                Err(ArenaError::LaunchTimeout(self.launch_timeout.as_secs()))
            }
        }
    }
}

fn side_detail(kind: ProviderKind, side: &Result<LaunchedAgent, ArenaError>) -> LaunchSideDetail {
    match side {
        Ok(agent) => LaunchSideDetail::succeeded(kind, agent.agent_id.clone()),
        Err(e) => LaunchSideDetail::failed(kind, e),
    }
}
