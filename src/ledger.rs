//! Vote intake for finished battles.

use std::sync::Arc;

use crate::error::ArenaError;
use crate::orchestrator::Caller;
use crate::store::{ArenaStore, Battle, Vote, VoteReceipt};

/// Parse the caller-facing vote vocabulary.
pub fn parse_vote(vote_type: &str, winner_id: Option<&str>) -> Result<Vote, ArenaError> {
    match vote_type.trim().to_lowercase().as_str() {
        "winner" => match winner_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(Vote::Winner {
                agent_id: id.to_string(),
            }),
            None => Err(ArenaError::Validation(
                "winnerId is required when voteType is 'winner'".to_string(),
            )),
        },
        "tie" => Ok(Vote::Tie),
        "both-bad" | "both_bad" => Ok(Vote::BothBad),
        other => Err(ArenaError::Validation(format!(
            "Unknown voteType '{}'. Expected winner, tie or both-bad",
            other
        ))),
    }
}

pub struct BattleLedger {
    store: Arc<dyn ArenaStore>,
    k_factor: f64,
}

impl BattleLedger {
    pub fn new(store: Arc<dyn ArenaStore>, k_factor: f64) -> Self {
        Self { store, k_factor }
    }

    /// Load a battle the caller owns.
    pub async fn get_battle(&self, caller: Option<&Caller>, battle_id: &str) -> Result<Battle, ArenaError> {
        let caller = caller.ok_or(ArenaError::Unauthenticated)?;
        let battle = self
            .store
            .get_battle(battle_id)
            .await?
            .ok_or_else(|| ArenaError::NotFound(format!("Battle {}", battle_id)))?;
        if battle.user_id != caller.user_id {
            return Err(ArenaError::Forbidden(
                "Only the battle owner can access it".to_string(),
            ));
        }
        Ok(battle)
    }

    /// Record the caller's vote on one of their battles, exactly once.
    pub async fn submit_vote(
        &self,
        caller: Option<&Caller>,
        battle_id: &str,
        vote_type: &str,
        winner_id: Option<&str>,
    ) -> Result<VoteReceipt, ArenaError> {
        let vote = parse_vote(vote_type, winner_id)?;
        let battle = self.get_battle(caller, battle_id).await?;

        if battle.vote.is_some() {
            return Err(ArenaError::AlreadyVoted);
        }
        if let Vote::Winner { agent_id } = &vote {
            if !battle.involves(agent_id) {
                return Err(ArenaError::Validation(format!(
                    "Agent {} is not part of battle {}",
                    agent_id, battle_id
                )));
            }
        }

        // The store re-checks the vote state atomically; the check above is only a fast path.
        let receipt = self
            .store
            .record_vote(battle_id, vote, self.k_factor)
            .await?;

        tracing::info!(
            battle_id = %battle_id,
            vote = receipt.vote.kind(),
            delta_a = receipt.rating_deltas.agent_a.delta,
            delta_b = receipt.rating_deltas.agent_b.delta,
            "Vote recorded"
        );
        Ok(receipt)
    }
}
