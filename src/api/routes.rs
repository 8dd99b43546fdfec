//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{self, MaybeCaller};
use super::error::ApiError;
use super::types::*;
use crate::browser::{BrowserSessionProvider, BrowserbaseClient};
use crate::config::Config;
use crate::error::ArenaError;
use crate::ledger::BattleLedger;
use crate::matchmaker::Matchmaker;
use crate::orchestrator::Orchestrator;
use crate::providers::{AdapterRegistry, CompletionTracker, ProviderKind};
use crate::store::{create_arena_store, AgentCompletion, ArenaStore, Battle};
use crate::validation::InstructionValidator;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ArenaStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub orchestrator: Orchestrator,
    pub ledger: BattleLedger,
}

impl AppState {
    /// Wire the components around an existing store and adapter set.
    pub fn new(
        config: Config,
        store: Arc<dyn ArenaStore>,
        adapters: AdapterRegistry,
        browsers: Option<Arc<dyn BrowserSessionProvider>>,
    ) -> Self {
        let adapters = Arc::new(adapters);
        let matchmaker = Arc::new(Matchmaker::restricted_to(
            config.provider_pool.clone(),
            &adapters.kinds(),
            None,
        ));
        if matchmaker.pool().is_empty() {
            tracing::warn!("No configured provider is available; battles will fail to start");
        }
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&adapters),
            matchmaker,
            browsers,
            InstructionValidator::new(config.max_instruction_length),
            config.launch_timeout,
        );
        let ledger = BattleLedger::new(Arc::clone(&store), config.k_factor);
        Self {
            config,
            store,
            adapters,
            orchestrator,
            ledger,
        }
    }

    /// Build the store, the browser provider and every configured adapter.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = create_arena_store(config.store_type, config.data_dir.clone()).await?;
        tracing::info!(persistent = store.is_persistent(), "Arena store initialized");

        let browsers: Option<Arc<dyn BrowserSessionProvider>> =
            match BrowserbaseClient::from_config(&config.browser) {
                Some(client) => Some(Arc::new(client)),
                None => {
                    tracing::warn!("Remote browser sessions disabled: BROWSERBASE_API_KEY or BROWSERBASE_PROJECT_ID missing");
                    None
                }
            };

        let tracker = CompletionTracker::new(Arc::clone(&store));
        let adapters =
            AdapterRegistry::from_config(&config, Arc::clone(&store), tracker, browsers.clone());
        tracing::info!(providers = ?adapters.kinds(), "Provider adapters registered");

        Ok(Self::new(config, store, adapters, browsers))
    }
}

/// Assemble the router for the given state.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/leaderboard", get(leaderboard));

    let caller_routes = Router::new()
        .route("/battle/create", post(create_battle))
        .route("/battle/vote", post(vote))
        .route("/battle/:id", get(get_battle))
        .route("/agent/:provider", post(launch_agent))
        .route("/session/:id", get(get_session))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::attach_caller,
        ));

    // Called by remote agent servers and the recording sync, not by users.
    let service_routes = Router::new()
        .route("/agent/:id/status", post(update_agent_status))
        .route("/agent/:id/recording", post(set_recording))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_service_token,
        ));

    Router::new()
        .merge(public_routes)
        .merge(caller_routes)
        .merge(service_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::from_config(config).await?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal. Background trackers are dropped with the runtime.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.adapters.kinds(),
    })
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let ratings = state.store.list_skill_ratings().await?;
    Ok(Json(LeaderboardResponse { ratings }))
}

async fn create_battle(
    State(state): State<Arc<AppState>>,
    Extension(MaybeCaller(caller)): Extension<MaybeCaller>,
    body: Result<Json<CreateBattleRequest>, JsonRejection>,
) -> Result<Json<CreateBattleResponse>, ApiError> {
    // A missing or malformed body is a missing instruction.
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let created = state
        .orchestrator
        .create_battle(caller.as_ref(), instruction_text(&req.instruction))
        .await?;
    Ok(Json(created.into()))
}

async fn vote(
    State(state): State<Arc<AppState>>,
    Extension(MaybeCaller(caller)): Extension<MaybeCaller>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<crate::store::VoteReceipt>, ApiError> {
    let Json(req) = body?;
    let receipt = state
        .ledger
        .submit_vote(
            caller.as_ref(),
            &req.battle_id,
            &req.vote_type,
            req.winner_id.as_deref(),
        )
        .await?;
    Ok(Json(receipt))
}

async fn get_battle(
    State(state): State<Arc<AppState>>,
    Extension(MaybeCaller(caller)): Extension<MaybeCaller>,
    Path(id): Path<String>,
) -> Result<Json<Battle>, ApiError> {
    let battle = state.ledger.get_battle(caller.as_ref(), &id).await?;
    Ok(Json(battle))
}

async fn launch_agent(
    State(state): State<Arc<AppState>>,
    Extension(MaybeCaller(caller)): Extension<MaybeCaller>,
    Path(provider): Path<String>,
    body: Result<Json<LaunchAgentRequest>, JsonRejection>,
) -> Result<Json<LaunchAgentResponse>, ApiError> {
    let kind: ProviderKind = provider
        .parse()
        .map_err(|e: crate::providers::UnknownProvider| ArenaError::Validation(e.to_string()))?;
    let Json(req) = body?;

    let agent = state
        .orchestrator
        .launch_single(
            caller.as_ref(),
            kind,
            &req.session_id,
            instruction_text(&req.instruction),
            req.provider_model,
        )
        .await?;

    Ok(Json(LaunchAgentResponse {
        session_id: req.session_id,
        agent_id: agent.agent_id,
        browser_session_id: agent.browser_session_id,
        live_url: agent.live_view_url,
    }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(MaybeCaller(caller)): Extension<MaybeCaller>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let caller = caller.ok_or(ArenaError::Unauthenticated)?;
    let session = state
        .store
        .get_session(&id)
        .await?
        .ok_or_else(|| ArenaError::NotFound(format!("Session {}", id)))?;
    if session.user_id != caller.user_id {
        return Err(ArenaError::Forbidden("Session belongs to another user".to_string()).into());
    }
    let agents = state.store.list_agent_runs(&session.id).await?;
    Ok(Json(SessionResponse { session, agents }))
}

async fn update_agent_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<AgentStatusUpdate>, JsonRejection>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let Json(update) = body?;

    if let Some(url) = update.live_url.as_deref() {
        state.store.set_live_view_url(&id, url).await?;
    }

    if update.status.is_terminal() {
        let completion = AgentCompletion {
            status: update.status,
            result: update.result,
            error: update.error,
            steps: update.steps,
            elapsed_secs: update.elapsed_secs,
        };
        state.store.complete_agent_run(&id, completion).await?;
    } else {
        state.store.update_agent_status(&id, update.status).await?;
    }

    tracing::info!(agent_id = %id, status = %update.status, "Remote status update applied");
    Ok(Json(AcceptedResponse { accepted: true }))
}

async fn set_recording(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<RecordingUpdate>, JsonRejection>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let Json(update) = body?;
    url::Url::parse(&update.recording_url)
        .map_err(|e| ArenaError::Validation(format!("Invalid recordingUrl: {}", e)))?;

    let accepted = state
        .store
        .set_recording_url(&id, &update.recording_url)
        .await?;
    if !accepted {
        tracing::debug!(agent_id = %id, "Recording url already set; keeping the first one");
    }
    Ok(Json(AcceptedResponse { accepted }))
}
