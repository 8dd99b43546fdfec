//! End-to-end battle lifecycle over HTTP with fake provider adapters.

use std::sync::Arc;
use std::time::Duration;

use agent_arena::api::{auth::issue_jwt, router, AppState};
use agent_arena::config::Config;
use agent_arena::providers::{
    AdapterRegistry, LaunchOutcome, LaunchRequest, ProviderAdapter, ProviderConfig, ProviderError,
    ProviderKind,
};
use agent_arena::store::{AgentStatus, ArenaStore, InMemoryArenaStore, NewAgentRun};
use async_trait::async_trait;
use serde_json::{json, Value};

struct FakeAdapter {
    kind: ProviderKind,
    store: Arc<dyn ArenaStore>,
    delay: Duration,
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, ProviderError> {
        tokio::time::sleep(self.delay).await;
        let run = self
            .store
            .create_agent_run(NewAgentRun::new(&request.session_id, self.kind).with_model(request.model))
            .await?;
        self.store
            .update_agent_status(&run.id, AgentStatus::Running)
            .await?;
        Ok(LaunchOutcome {
            agent_run_id: run.id,
            live_view_url: Some(format!("https://live.example/{}", self.kind)),
            browser_session_id: None,
        })
    }
}

struct Server {
    base: String,
    store: Arc<InMemoryArenaStore>,
    http: reqwest::Client,
}

impl Server {
    async fn start(mut config: Config, adapters: Vec<(ProviderKind, Duration)>) -> Self {
        let store = Arc::new(InMemoryArenaStore::new());
        let dyn_store: Arc<dyn ArenaStore> = store.clone();

        let mut registry = AdapterRegistry::new();
        for (kind, delay) in &adapters {
            registry.register(Arc::new(FakeAdapter {
                kind: *kind,
                store: dyn_store.clone(),
                delay: *delay,
            }));
        }
        config.provider_pool = adapters
            .iter()
            .map(|(kind, _)| ProviderConfig::new(*kind, None))
            .collect();

        let state = Arc::new(AppState::new(config, dyn_store, registry, None));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            base: format!("http://{}", addr),
            store,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value, token: Option<&str>) -> (u16, Value) {
        let mut request = self.http.post(format!("{}{}", self.base, path)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

fn fast_pair() -> Vec<(ProviderKind, Duration)> {
    vec![
        (ProviderKind::Notte, Duration::ZERO),
        (ProviderKind::Smooth, Duration::ZERO),
    ]
}

#[tokio::test]
async fn battle_then_vote_updates_ratings_once() {
    let server = Server::start(Config::for_tests(), fast_pair()).await;

    let (status, health) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(health["providers"], json!(["notte", "smooth"]));

    let (status, created) = server
        .post("/battle/create", json!({ "instruction": "find the cheapest flight" }), None)
        .await;
    assert_eq!(status, 200, "{created}");
    assert_eq!(created["sameFramework"], false);
    let battle_id = created["battleId"].as_str().unwrap().to_string();
    let agent_a = created["agents"]["agentA"]["agentId"].as_str().unwrap().to_string();
    assert!(created["agents"]["agentB"]["liveUrl"].is_string());

    let (status, receipt) = server
        .post(
            "/battle/vote",
            json!({ "battleId": battle_id, "voteType": "winner", "winnerId": agent_a }),
            None,
        )
        .await;
    assert_eq!(status, 200, "{receipt}");
    let delta_a = receipt["ratingDeltas"]["agentA"]["delta"].as_f64().unwrap();
    let delta_b = receipt["ratingDeltas"]["agentB"]["delta"].as_f64().unwrap();
    assert!(delta_a > 0.0);
    assert!((delta_a + delta_b).abs() < 1e-9);

    let (status, again) = server
        .post(
            "/battle/vote",
            json!({ "battleId": battle_id, "voteType": "tie" }),
            None,
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(again["error"]["code"], "ALREADY_VOTED");
    assert!(again["correlationId"].is_string());

    let (_, battle) = server.get(&format!("/battle/{}", battle_id)).await;
    assert_eq!(battle["vote"]["type"], "winner");
    assert_eq!(battle["vote"]["agentId"], agent_a.as_str());

    let (_, board) = server.get("/leaderboard").await;
    let ratings = board["ratings"].as_array().unwrap();
    assert_eq!(ratings.len(), 2);
    assert!(ratings[0]["rating"].as_f64().unwrap() > ratings[1]["rating"].as_f64().unwrap());
}

#[tokio::test]
async fn empty_instruction_is_rejected_without_a_session() {
    let server = Server::start(Config::for_tests(), fast_pair()).await;

    let (status, body) = server
        .post("/battle/create", json!({ "instruction": "   " }), None)
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "Instruction cannot be empty");

    let (status, body) = server.post("/battle/create", json!({}), None).await;
    assert_eq!(status, 400);
    assert_eq!(
        body["error"]["message"],
        "Instruction is required and must be a string"
    );

    assert!(server.store.list_sessions("dev-user").await.unwrap().is_empty());
}

#[tokio::test]
async fn one_side_timing_out_fails_the_battle() {
    let mut config = Config::for_tests();
    config.launch_timeout = Duration::from_millis(200);
    let server = Server::start(
        config,
        vec![
            (ProviderKind::Notte, Duration::from_millis(10)),
            (ProviderKind::Smooth, Duration::from_secs(30)),
        ],
    )
    .await;

    let (status, body) = server
        .post("/battle/create", json!({ "instruction": "compare prices" }), None)
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["error"]["code"], "LAUNCH_FAILED");

    let details = body["details"].as_array().unwrap();
    let ok = details.iter().find(|d| d["ok"] == true).unwrap();
    let failed = details.iter().find(|d| d["ok"] == false).unwrap();
    assert_eq!(failed["code"], "LAUNCH_TIMEOUT");

    let run = server
        .store
        .get_agent_run(ok["agentId"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(run.status, AgentStatus::Failed);
}

#[tokio::test]
async fn callers_need_a_valid_token_outside_dev_mode() {
    let mut config = Config::for_tests();
    config.dev_mode = false;
    config.jwt_secret = Some("jwt-secret".to_string());
    config.direct.server_token = Some("service-token".to_string());
    let server = Server::start(config, fast_pair()).await;

    let (status, body) = server
        .post("/battle/create", json!({ "instruction": "go" }), None)
        .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

    let token = issue_jwt("jwt-secret", "alice", 1).unwrap();
    let (status, created) = server
        .post("/battle/create", json!({ "instruction": "go" }), Some(&token))
        .await;
    assert_eq!(status, 200, "{created}");
    let agent_id = created["agents"]["agentA"]["agentId"].as_str().unwrap().to_string();

    // Status callbacks take the service token, not a user token.
    let path = format!("/agent/{}/status", agent_id);
    let update = json!({ "status": "failed", "error": "remote crashed" });
    let (status, _) = server.post(&path, update.clone(), Some(&token)).await;
    assert_eq!(status, 401);
    let (status, body) = server.post(&path, update, Some("service-token")).await;
    assert_eq!(status, 200);
    assert_eq!(body["accepted"], true);

    // Terminal runs reject any further status write.
    let (status, body) = server
        .post(&path, json!({ "status": "running" }), Some("service-token"))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let recording = format!("/agent/{}/recording", agent_id);
    let (_, first) = server
        .post(&recording, json!({ "recordingUrl": "https://rec/1" }), Some("service-token"))
        .await;
    let (_, second) = server
        .post(&recording, json!({ "recordingUrl": "https://rec/2" }), Some("service-token"))
        .await;
    assert_eq!(first["accepted"], true);
    assert_eq!(second["accepted"], false);
}
