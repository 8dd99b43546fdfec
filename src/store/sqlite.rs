//! SQLite-based arena store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AgentCompletion, AgentResult, AgentRun, AgentStatus, ArenaStore, Battle, BattleAgent,
    NewAgentRun, NewBattle, Session, StoreError, Vote, VoteReceipt,
};
use crate::providers::ProviderKind;
use crate::rating::{apply_outcome, RatingKey, SkillRating};
use crate::util::now_string;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    instruction TEXT NOT NULL,
    is_private INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    winner_agent_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS agent_runs (
    id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT,
    status TEXT NOT NULL DEFAULT 'initializing',
    steps INTEGER NOT NULL DEFAULT 0,
    elapsed_secs REAL NOT NULL DEFAULT 0,
    error TEXT,
    result_json TEXT,
    live_view_url TEXT,
    recording_url TEXT,
    external_session_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_agent_runs_session ON agent_runs(session_id, created_at);

CREATE TABLE IF NOT EXISTS battles (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    instruction TEXT NOT NULL,
    agent_a_id TEXT NOT NULL,
    agent_a_provider TEXT NOT NULL,
    agent_a_model TEXT,
    agent_b_id TEXT NOT NULL,
    agent_b_provider TEXT NOT NULL,
    agent_b_model TEXT,
    same_framework INTEGER NOT NULL DEFAULT 0,
    vote_json TEXT,
    voted_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS skill_ratings (
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    rating REAL NOT NULL,
    battles INTEGER NOT NULL DEFAULT 0,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    ties INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (provider, model)
);
"#;

const RUN_COLUMNS: &str = "id, session_id, provider, model, status, steps, elapsed_secs, error,
     result_json, live_view_url, recording_url, external_session_id, created_at, updated_at";

const BATTLE_COLUMNS: &str = "id, user_id, session_id, instruction, agent_a_id, agent_a_provider,
     agent_a_model, agent_b_id, agent_b_provider, agent_b_model, same_framework, vote_json,
     voted_at, created_at";

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| StoreError::Backend(format!("{}: {}", context, e))
}

fn parse_provider(value: String) -> rusqlite::Result<ProviderKind> {
    value.parse().map_err(|e: crate::providers::UnknownProvider| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_status(value: &str) -> AgentStatus {
    AgentStatus::parse(value).unwrap_or(AgentStatus::Initializing)
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        instruction: row.get(2)?,
        is_private: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        completed_at: row.get(5)?,
        winner_agent_id: row.get(6)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<AgentRun> {
    let status: String = row.get(4)?;
    let result_json: Option<String> = row.get(8)?;
    Ok(AgentRun {
        id: row.get(0)?,
        session_id: row.get(1)?,
        provider: parse_provider(row.get(2)?)?,
        model: row.get(3)?,
        status: parse_status(&status),
        steps: row.get::<_, i64>(5)? as u32,
        elapsed_secs: row.get(6)?,
        error: row.get(7)?,
        result: result_json.and_then(|s| serde_json::from_str::<AgentResult>(&s).ok()),
        live_view_url: row.get(9)?,
        recording_url: row.get(10)?,
        external_session_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn row_to_battle(row: &Row<'_>) -> rusqlite::Result<Battle> {
    let vote_json: Option<String> = row.get(11)?;
    Ok(Battle {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        instruction: row.get(3)?,
        agent_a: BattleAgent {
            agent_id: row.get(4)?,
            provider: parse_provider(row.get(5)?)?,
            model: row.get(6)?,
        },
        agent_b: BattleAgent {
            agent_id: row.get(7)?,
            provider: parse_provider(row.get(8)?)?,
            model: row.get(9)?,
        },
        same_framework: row.get::<_, i64>(10)? != 0,
        vote: vote_json.and_then(|s| serde_json::from_str::<Vote>(&s).ok()),
        voted_at: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn row_to_rating(row: &Row<'_>) -> rusqlite::Result<SkillRating> {
    Ok(SkillRating {
        provider: row.get(0)?,
        model: row.get(1)?,
        rating: row.get(2)?,
        battles: row.get::<_, i64>(3)? as u32,
        wins: row.get::<_, i64>(4)? as u32,
        losses: row.get::<_, i64>(5)? as u32,
        ties: row.get::<_, i64>(6)? as u32,
    })
}

fn load_run(conn: &Connection, id: &str) -> Result<Option<AgentRun>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM agent_runs WHERE id = ?1", RUN_COLUMNS),
        params![id],
        row_to_run,
    )
    .optional()
    .map_err(db_err("Failed to load agent run"))
}

fn require_run(conn: &Connection, id: &str) -> Result<AgentRun, StoreError> {
    load_run(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("Agent run {}", id)))
}

fn load_rating(conn: &Connection, key: &RatingKey) -> Result<SkillRating, StoreError> {
    let row = conn
        .query_row(
            "SELECT provider, model, rating, battles, wins, losses, ties
             FROM skill_ratings WHERE provider = ?1 AND model = ?2",
            params![key.provider, key.model],
            row_to_rating,
        )
        .optional()
        .map_err(db_err("Failed to load skill rating"))?;
    Ok(row.unwrap_or_else(|| SkillRating::initial(key)))
}

fn save_rating(conn: &Connection, rating: &SkillRating) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO skill_ratings (provider, model, rating, battles, wins, losses, ties)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(provider, model) DO UPDATE SET
            rating = excluded.rating, battles = excluded.battles, wins = excluded.wins,
            losses = excluded.losses, ties = excluded.ties",
        params![
            rating.provider,
            rating.model,
            rating.rating,
            rating.battles as i64,
            rating.wins as i64,
            rating.losses as i64,
            rating.ties as i64
        ],
    )
    .map_err(db_err("Failed to save skill rating"))?;
    Ok(())
}

pub struct SqliteArenaStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteArenaStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Backend(format!("Failed to create arena store dir: {}", e))
            })?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(db_err("Failed to open SQLite database"))?;
            conn.execute_batch(SCHEMA).map_err(db_err("Failed to run schema"))?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))?
    }
}

fn mark_session_complete_if_done(conn: &Connection, session_id: &str) -> Result<(), StoreError> {
    let open_runs: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM agent_runs
             WHERE session_id = ?1 AND status NOT IN ('completed', 'failed')",
            params![session_id],
            |row| row.get(0),
        )
        .map_err(db_err("Failed to count open agent runs"))?;
    if open_runs == 0 {
        conn.execute(
            "UPDATE sessions SET completed_at = ?1 WHERE id = ?2 AND completed_at IS NULL",
            params![now_string(), session_id],
        )
        .map_err(db_err("Failed to mark session complete"))?;
    }
    Ok(())
}

#[async_trait]
impl ArenaStore for SqliteArenaStore {
    fn is_persistent(&self) -> bool {
        true
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
        let row = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, instruction, is_private, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.id, row.user_id, row.instruction, row.is_private as i64, row.created_at],
            )
            .map_err(db_err("Failed to create session"))?;
            Ok(())
        })
        .await?;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, user_id, instruction, is_private, created_at, completed_at, winner_agent_id
                 FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()
            .map_err(db_err("Failed to load session"))
        })
        .await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, instruction, is_private, created_at, completed_at, winner_agent_id
                     FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC",
                )
                .map_err(db_err("Failed to prepare statement"))?;
            let sessions = stmt
                .query_map(params![user_id], row_to_session)
                .map_err(db_err("Failed to query sessions"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err("Failed to read session row"))?;
            Ok(sessions)
        })
        .await
    }

    async fn create_agent_run(&self, run: NewAgentRun) -> Result<AgentRun, StoreError> {
        self.with_conn(move |conn| {
            let session_exists: bool = conn
                .prepare("SELECT 1 FROM sessions WHERE id = ?1")
                .map_err(db_err("Failed to prepare statement"))?
                .exists(params![run.session_id])
                .map_err(db_err("Failed to look up session"))?;
            if !session_exists {
                return Err(StoreError::NotFound(format!("Session {}", run.session_id)));
            }

            let id = Uuid::new_v4().to_string();
            let now = now_string();
            conn.execute(
                "INSERT INTO agent_runs (id, session_id, provider, model, status, live_view_url,
                                         external_session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'initializing', ?5, ?6, ?7, ?7)",
                params![
                    id,
                    run.session_id,
                    run.provider.as_str(),
                    run.model,
                    run.live_view_url,
                    run.external_session_id,
                    now
                ],
            )
            .map_err(db_err("Failed to create agent run"))?;
            require_run(conn, &id)
        })
        .await
    }

    async fn get_agent_run(&self, id: &str) -> Result<Option<AgentRun>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| load_run(conn, &id)).await
    }

    async fn list_agent_runs(&self, session_id: &str) -> Result<Vec<AgentRun>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM agent_runs WHERE session_id = ?1 ORDER BY created_at ASC",
                    RUN_COLUMNS
                ))
                .map_err(db_err("Failed to prepare statement"))?;
            let runs = stmt
                .query_map(params![session_id], row_to_run)
                .map_err(db_err("Failed to query agent runs"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err("Failed to read agent run row"))?;
            Ok(runs)
        })
        .await
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
        let id = id.to_string();
        self.with_conn(move |conn| {
            let run = require_run(conn, &id)?;
            if run.status.check_transition(status)? {
                conn.execute(
                    "UPDATE agent_runs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now_string(), id],
                )
                .map_err(db_err("Failed to update agent status"))?;
            }
            Ok(())
        })
        .await
    }

    async fn set_live_view_url(&self, id: &str, url: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let url = url.to_string();
        self.with_conn(move |conn| {
            require_run(conn, &id)?;
            let changed = conn
                .execute(
                    "UPDATE agent_runs SET live_view_url = ?1, updated_at = ?2
                     WHERE id = ?3 AND live_view_url IS NULL",
                    params![url, now_string(), id],
                )
                .map_err(db_err("Failed to set live view url"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn complete_agent_run(
        &self,
        id: &str,
        completion: AgentCompletion,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let run = require_run(conn, &id)?;
            run.status.check_transition(completion.status)?;
            if !completion.status.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    from: run.status,
                    to: completion.status,
                });
            }

            let result_json = match completion.result.as_ref() {
                Some(result) => Some(serde_json::to_string(result).map_err(|e| {
                    StoreError::Backend(format!("Failed to serialize agent result: {}", e))
                })?),
                None => None,
            };

            let tx = conn
                .transaction()
                .map_err(db_err("Failed to start transaction"))?;
            tx.execute(
                "UPDATE agent_runs SET
                    status = ?1,
                    error = ?2,
                    result_json = COALESCE(?3, result_json),
                    steps = COALESCE(?4, steps),
                    elapsed_secs = COALESCE(?5, elapsed_secs),
                    updated_at = ?6
                 WHERE id = ?7",
                params![
                    completion.status.as_str(),
                    completion.error,
                    result_json,
                    completion.steps.map(|s| s as i64),
                    completion.elapsed_secs,
                    now_string(),
                    id
                ],
            )
            .map_err(db_err("Failed to complete agent run"))?;
            mark_session_complete_if_done(&tx, &run.session_id)?;
            tx.commit().map_err(db_err("Failed to commit transaction"))?;
            Ok(())
        })
        .await
    }

    async fn set_recording_url(&self, id: &str, url: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let url = url.to_string();
        self.with_conn(move |conn| {
            require_run(conn, &id)?;
            let changed = conn
                .execute(
                    "UPDATE agent_runs SET recording_url = ?1, updated_at = ?2
                     WHERE id = ?3 AND recording_url IS NULL",
                    params![url, now_string(), id],
                )
                .map_err(db_err("Failed to set recording url"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn create_battle(&self, battle: NewBattle) -> Result<Battle, StoreError> {
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
        let row = battle.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO battles (id, user_id, session_id, instruction, agent_a_id,
                    agent_a_provider, agent_a_model, agent_b_id, agent_b_provider, agent_b_model,
                    same_framework, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.id,
                    row.user_id,
                    row.session_id,
                    row.instruction,
                    row.agent_a.agent_id,
                    row.agent_a.provider.as_str(),
                    row.agent_a.model,
                    row.agent_b.agent_id,
                    row.agent_b.provider.as_str(),
                    row.agent_b.model,
                    row.same_framework as i64,
                    row.created_at
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::NotFound(format!("Session {}", row.session_id))
                }
                other => StoreError::Backend(format!("Failed to create battle: {}", other)),
            })?;
            Ok(())
        })
        .await?;
        Ok(battle)
    }

    async fn get_battle(&self, id: &str) -> Result<Option<Battle>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM battles WHERE id = ?1", BATTLE_COLUMNS),
                params![id],
                row_to_battle,
            )
            .optional()
            .map_err(db_err("Failed to load battle"))
        })
        .await
    }

    async fn record_vote(
        &self,
        battle_id: &str,
        vote: Vote,
        k_factor: f64,
    ) -> Result<VoteReceipt, StoreError> {
        let battle_id = battle_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(db_err("Failed to start transaction"))?;

            let battle = tx
                .query_row(
                    &format!("SELECT {} FROM battles WHERE id = ?1", BATTLE_COLUMNS),
                    params![battle_id],
                    row_to_battle,
                )
                .optional()
                .map_err(db_err("Failed to load battle"))?
                .ok_or_else(|| StoreError::NotFound(format!("Battle {}", battle_id)))?;
            if battle.vote.is_some() {
                return Err(StoreError::AlreadyVoted(battle_id));
            }
            let outcome = battle.outcome_for(&vote)?;

            let key_a = battle.agent_a.rating_key();
            let key_b = battle.agent_b.rating_key();
            let (new_a, new_b, deltas) =
                apply_outcome(&load_rating(&tx, &key_a)?, &load_rating(&tx, &key_b)?, outcome, k_factor);
            save_rating(&tx, &new_a)?;
            save_rating(&tx, &new_b)?;

            let vote_json = serde_json::to_string(&vote)
                .map_err(|e| StoreError::Backend(format!("Failed to serialize vote: {}", e)))?;
            let updated = tx
                .execute(
                    "UPDATE battles SET vote_json = ?1, voted_at = ?2
                     WHERE id = ?3 AND vote_json IS NULL",
                    params![vote_json, now_string(), battle_id],
                )
                .map_err(db_err("Failed to record vote"))?;
            if updated == 0 {
                return Err(StoreError::AlreadyVoted(battle_id));
            }

            if let Vote::Winner { agent_id } = &vote {
                tx.execute(
                    "UPDATE sessions SET winner_agent_id = ?1 WHERE id = ?2",
                    params![agent_id, battle.session_id],
                )
                .map_err(db_err("Failed to record session winner"))?;
            }

            tx.commit().map_err(db_err("Failed to commit vote"))?;
            Ok(VoteReceipt {
                battle_id,
                vote,
                rating_deltas: deltas,
            })
        })
        .await
    }

    async fn list_skill_ratings(&self) -> Result<Vec<SkillRating>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT provider, model, rating, battles, wins, losses, ties
                     FROM skill_ratings ORDER BY rating DESC",
                )
                .map_err(db_err("Failed to prepare statement"))?;
            let ratings = stmt
                .query_map([], row_to_rating)
                .map_err(db_err("Failed to query skill ratings"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err("Failed to read skill rating row"))?;
            Ok(ratings)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteArenaStore {
        SqliteArenaStore::new(dir.path().join("arena.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_agent_run_round_trip_and_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let session = store.create_session("u", "book a table", true).await.unwrap();
        let run = store
            .create_agent_run(
                NewAgentRun::new(&session.id, ProviderKind::BrowserUse)
                    .with_model(Some("openai/gpt-4.1".to_string()))
                    .with_live_view_url(Some("https://live/1".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(run.status, AgentStatus::Initializing);
        assert_eq!(run.live_view_url.as_deref(), Some("https://live/1"));
        assert!(!store.set_live_view_url(&run.id, "https://live/2").await.unwrap());

        store.update_agent_status(&run.id, AgentStatus::Running).await.unwrap();
        store
            .complete_agent_run(&run.id, AgentCompletion::failed("browser crashed").with_steps(4))
            .await
            .unwrap();
        assert!(store
            .update_agent_status(&run.id, AgentStatus::Running)
            .await
            .is_err());

        let stored = store.get_agent_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);
        assert_eq!(stored.steps, 4);
        assert_eq!(stored.model.as_deref(), Some("openai/gpt-4.1"));

        let session = store.get_session(&session.id).await.unwrap().unwrap();
        assert!(session.completed_at.is_some());
        assert!(session.is_private);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (session_id, run_id) = {
            let store = open_store(&dir).await;
            let session = store.create_session("u", "persist me", false).await.unwrap();
            let run = store
                .create_agent_run(
                    NewAgentRun::new(&session.id, ProviderKind::Stagehand)
                        .with_external_session_id(Some("bb-9".to_string())),
                )
                .await
                .unwrap();
            (session.id, run.id)
        };
        let store = open_store(&dir).await;
        let sessions = store.list_sessions("u").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, session_id);

        let run = store.get_agent_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.external_session_id.as_deref(), Some("bb-9"));
    }
}
