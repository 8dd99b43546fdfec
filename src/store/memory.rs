//! In-memory arena store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AgentCompletion, AgentRun, AgentStatus, ArenaStore, Battle, NewAgentRun, NewBattle, Session,
    StoreError, Vote, VoteReceipt,
};
use crate::rating::{apply_outcome, RatingKey, SkillRating};
use crate::util::now_string;

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    runs: HashMap<String, AgentRun>,
    battles: HashMap<String, Battle>,
    ratings: HashMap<RatingKey, SkillRating>,
}

impl Tables {
    fn run_mut(&mut self, id: &str) -> Result<&mut AgentRun, StoreError> {
        self.runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("Agent run {}", id)))
    }

    fn mark_session_complete_if_done(&mut self, session_id: &str) {
        let all_terminal = self
            .runs
            .values()
            .filter(|r| r.session_id == session_id)
            .all(|r| r.status.is_terminal());
        if !all_terminal {
            return;
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            if session.completed_at.is_none() {
                session.completed_at = Some(now_string());
            }
        }
    }

    fn rating(&self, key: &RatingKey) -> SkillRating {
        self.ratings
            .get(key)
            .cloned()
            .unwrap_or_else(|| SkillRating::initial(key))
    }
}

/// A single lock guards all tables so multi-record writes (votes) are atomic.
#[derive(Clone, Default)]
pub struct InMemoryArenaStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryArenaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArenaStore for InMemoryArenaStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create_session(
        &self,
        user_id: &str,
        instruction: &str,
        is_private: bool,
    ) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            instruction: instruction.to_string(),
            is_private,
            created_at: now_string(),
            completed_at: None,
            winner_agent_id: None,
        };
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn create_agent_run(&self, run: NewAgentRun) -> Result<AgentRun, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&run.session_id) {
            return Err(StoreError::NotFound(format!("Session {}", run.session_id)));
        }
        let id = Uuid::new_v4().to_string();
        let now = now_string();
        let agent = AgentRun {
            id: id.clone(),
            session_id: run.session_id,
            provider: run.provider,
            model: run.model,
            status: AgentStatus::Initializing,
            steps: 0,
            elapsed_secs: 0.0,
            error: None,
            result: None,
            live_view_url: run.live_view_url,
            recording_url: None,
            external_session_id: run.external_session_id,
            created_at: now.clone(),
            updated_at: now,
        };
        tables.runs.insert(id, agent.clone());
        Ok(agent)
    }

    async fn get_agent_run(&self, id: &str) -> Result<Option<AgentRun>, StoreError> {
        Ok(self.tables.read().await.runs.get(id).cloned())
    }

    async fn list_agent_runs(&self, session_id: &str) -> Result<Vec<AgentRun>, StoreError> {
        let mut runs: Vec<AgentRun> = self
            .tables
            .read()
            .await
            .runs
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn update_agent_status(&self, id: &str, status: AgentStatus) -> Result<(), StoreError> {
        if status.is_terminal() {
            return self
                .complete_agent_run(
                    id,
                    AgentCompletion {
                        status,
                        result: None,
                        error: None,
                        steps: None,
                        elapsed_secs: None,
                    },
                )
                .await;
        }
        let mut tables = self.tables.write().await;
        let run = tables.run_mut(id)?;
        if run.status.check_transition(status)? {
            run.status = status;
            run.updated_at = now_string();
        }
        Ok(())
    }

    async fn set_live_view_url(&self, id: &str, url: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let run = tables.run_mut(id)?;
        if run.live_view_url.is_some() {
            return Ok(false);
        }
        run.live_view_url = Some(url.to_string());
        run.updated_at = now_string();
        Ok(true)
    }

    async fn complete_agent_run(
        &self,
        id: &str,
        completion: AgentCompletion,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let run = tables.run_mut(id)?;
        run.status.check_transition(completion.status)?;
        if !completion.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                from: run.status,
                to: completion.status,
            });
        }
        run.status = completion.status;
        run.error = completion.error;
        if let Some(result) = completion.result {
            run.result = Some(result);
        }
        if let Some(steps) = completion.steps {
            run.steps = steps;
        }
        if let Some(elapsed) = completion.elapsed_secs {
            run.elapsed_secs = elapsed;
        }
        run.updated_at = now_string();
        let session_id = run.session_id.clone();
        tables.mark_session_complete_if_done(&session_id);
        Ok(())
    }

    async fn set_recording_url(&self, id: &str, url: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let run = tables.run_mut(id)?;
        if run.recording_url.is_some() {
            return Ok(false);
        }
        run.recording_url = Some(url.to_string());
        run.updated_at = now_string();
        Ok(true)
    }

    async fn create_battle(&self, battle: NewBattle) -> Result<Battle, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&battle.session_id) {
            return Err(StoreError::NotFound(format!("Session {}", battle.session_id)));
        }
        let battle = Battle {
            id: Uuid::new_v4().to_string(),
            user_id: battle.user_id,
            session_id: battle.session_id,
            instruction: battle.instruction,
            agent_a: battle.agent_a,
            agent_b: battle.agent_b,
            same_framework: battle.same_framework,
            vote: None,
            voted_at: None,
            created_at: now_string(),
        };
        tables.battles.insert(battle.id.clone(), battle.clone());
        Ok(battle)
    }

    async fn get_battle(&self, id: &str) -> Result<Option<Battle>, StoreError> {
        Ok(self.tables.read().await.battles.get(id).cloned())
    }

    async fn record_vote(
        &self,
        battle_id: &str,
        vote: Vote,
        k_factor: f64,
    ) -> Result<VoteReceipt, StoreError> {
        let mut tables = self.tables.write().await;
        let battle = tables
            .battles
            .get(battle_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Battle {}", battle_id)))?;
        if battle.vote.is_some() {
            return Err(StoreError::AlreadyVoted(battle_id.to_string()));
        }
        let outcome = battle.outcome_for(&vote)?;

        let key_a = battle.agent_a.rating_key();
        let key_b = battle.agent_b.rating_key();
        let (new_a, new_b, deltas) = apply_outcome(
            &tables.rating(&key_a),
            &tables.rating(&key_b),
            outcome,
            k_factor,
        );
        tables.ratings.insert(key_a, new_a);
        tables.ratings.insert(key_b, new_b);

        if let Vote::Winner { agent_id } = &vote {
            if let Some(session) = tables.sessions.get_mut(&battle.session_id) {
                session.winner_agent_id = Some(agent_id.clone());
            }
        }
        if let Some(stored) = tables.battles.get_mut(battle_id) {
            stored.vote = Some(vote.clone());
            stored.voted_at = Some(now_string());
        }

        Ok(VoteReceipt {
            battle_id: battle_id.to_string(),
            vote,
            rating_deltas: deltas,
        })
    }

    async fn list_skill_ratings(&self) -> Result<Vec<SkillRating>, StoreError> {
        let mut ratings: Vec<SkillRating> =
            self.tables.read().await.ratings.values().cloned().collect();
        ratings.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        Ok(ratings)
    }
}
