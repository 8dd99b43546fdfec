//! The same invariants checked against every store backend.

use std::sync::Arc;

use agent_arena::config::DEFAULT_K_FACTOR;
use agent_arena::providers::ProviderKind;
use agent_arena::store::{
    AgentCompletion, AgentStatus, ArenaStore, BattleAgent, InMemoryArenaStore, NewAgentRun,
    NewBattle, SqliteArenaStore, StoreError, Vote,
};

async fn backends() -> (Vec<Arc<dyn ArenaStore>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteArenaStore::new(dir.path().join("arena.db")).await.unwrap();
    (
        vec![Arc::new(InMemoryArenaStore::new()), Arc::new(sqlite)],
        dir,
    )
}

fn agent(id: &str, provider: ProviderKind, model: Option<&str>) -> BattleAgent {
    BattleAgent {
        agent_id: id.to_string(),
        provider,
        model: model.map(str::to_string),
    }
}

#[tokio::test]
async fn status_only_moves_forward() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let session = store.create_session("u", "go", false).await.unwrap();
        let run = store
            .create_agent_run(NewAgentRun::new(&session.id, ProviderKind::Smooth))
            .await
            .unwrap();
        assert_eq!(run.status, AgentStatus::Initializing);

        store.update_agent_status(&run.id, AgentStatus::Running).await.unwrap();
        // Same non-terminal status again is a no-op.
        store.update_agent_status(&run.id, AgentStatus::Running).await.unwrap();
        store
            .complete_agent_run(&run.id, AgentCompletion::failed("boom"))
            .await
            .unwrap();

        for next in [AgentStatus::Running, AgentStatus::Completed, AgentStatus::Initializing] {
            let err = store.update_agent_status(&run.id, next).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidTransition { .. }), "{err}");
        }
        let stored = store.get_agent_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }
}

#[tokio::test]
async fn urls_are_first_write_wins() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let session = store.create_session("u", "go", false).await.unwrap();
        let run = store
            .create_agent_run(NewAgentRun::new(&session.id, ProviderKind::BrowserUse))
            .await
            .unwrap();
        assert!(store.set_live_view_url(&run.id, "https://live/1").await.unwrap());
        assert!(!store.set_live_view_url(&run.id, "https://live/2").await.unwrap());
        assert!(store.set_recording_url(&run.id, "https://rec/1").await.unwrap());
        assert!(!store.set_recording_url(&run.id, "https://rec/2").await.unwrap());

        let stored = store.get_agent_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.live_view_url.as_deref(), Some("https://live/1"));
        assert_eq!(stored.recording_url.as_deref(), Some("https://rec/1"));
    }
}

#[tokio::test]
async fn concurrent_votes_apply_exactly_once() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let session = store.create_session("u", "go", false).await.unwrap();
        let battle = store
            .create_battle(NewBattle {
                user_id: "u".to_string(),
                session_id: session.id.clone(),
                instruction: "go".to_string(),
                agent_a: agent("a", ProviderKind::Notte, None),
                agent_b: agent("b", ProviderKind::BrowserUse, Some("openai/gpt-4.1")),
                same_framework: false,
            })
            .await
            .unwrap();

        let first = {
            let store = store.clone();
            let id = battle.id.clone();
            tokio::spawn(async move {
                store
                    .record_vote(&id, Vote::Winner { agent_id: "a".to_string() }, DEFAULT_K_FACTOR)
                    .await
            })
        };
        let second = {
            let store = store.clone();
            let id = battle.id.clone();
            tokio::spawn(async move { store.record_vote(&id, Vote::Tie, DEFAULT_K_FACTOR).await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];
        let ok: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
        assert_eq!(ok.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::AlreadyVoted(_)))));

        let ratings = store.list_skill_ratings().await.unwrap();
        assert_eq!(ratings.len(), 2);
        assert!(ratings.iter().all(|r| r.battles == 1));
        let total: f64 = ratings.iter().map(|r| r.rating).sum();
        assert!((total - 2000.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn both_bad_leaves_ratings_unchanged() {
    let (stores, _dir) = backends().await;
    for store in stores {
        let session = store.create_session("u", "go", false).await.unwrap();
        let battle = store
            .create_battle(NewBattle {
                user_id: "u".to_string(),
                session_id: session.id.clone(),
                instruction: "go".to_string(),
                agent_a: agent("a", ProviderKind::Stagehand, None),
                agent_b: agent("b", ProviderKind::Smooth, None),
                same_framework: false,
            })
            .await
            .unwrap();
        let receipt = store
            .record_vote(&battle.id, Vote::BothBad, DEFAULT_K_FACTOR)
            .await
            .unwrap();
        assert_eq!(receipt.rating_deltas.agent_a.delta, 0.0);
        assert_eq!(receipt.rating_deltas.agent_b.delta, 0.0);
        assert_eq!(receipt.vote.kind(), "both_bad");
    }
}
