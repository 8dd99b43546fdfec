//! Elo-style skill ratings keyed by (provider, model).

use serde::{Deserialize, Serialize};

pub const INITIAL_RATING: f64 = 1000.0;

/// Model column value for ratings of providers run without a model hint.
pub const DEFAULT_MODEL_KEY: &str = "default";

/// Identifies one rating row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RatingKey {
    pub provider: String,
    pub model: String,
}

impl RatingKey {
    pub fn new(provider: impl Into<String>, model: Option<&str>) -> Self {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL_KEY);
        Self {
            provider: provider.into(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRating {
    pub provider: String,
    pub model: String,
    pub rating: f64,
    pub battles: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
}

impl SkillRating {
    pub fn initial(key: &RatingKey) -> Self {
        Self {
            provider: key.provider.clone(),
            model: key.model.clone(),
            rating: INITIAL_RATING,
            battles: 0,
            wins: 0,
            losses: 0,
            ties: 0,
        }
    }

    pub fn key(&self) -> RatingKey {
        RatingKey {
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }
}

/// Result of a vote from agent A's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AWins,
    BWins,
    Tie,
    BothBad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    pub provider: String,
    pub model: String,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
}

impl RatingChange {
    fn between(before: &SkillRating, after: &SkillRating) -> Self {
        Self {
            provider: after.provider.clone(),
            model: after.model.clone(),
            before: before.rating,
            after: after.rating,
            delta: after.rating - before.rating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingDeltas {
    pub agent_a: RatingChange,
    pub agent_b: RatingChange,
}

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Apply one vote to a pair of ratings and return the updated rows.
///
/// Both rows must come from the store before the vote. When both sides share
/// a key, pass the same row twice: counters move but the rating does not,
/// and the caller should persist only one of the returned rows.
pub fn apply_outcome(
    a: &SkillRating,
    b: &SkillRating,
    outcome: Outcome,
    k_factor: f64,
) -> (SkillRating, SkillRating, RatingDeltas) {
    let mut new_a = a.clone();
    let mut new_b = b.clone();

    let same_key = a.key() == b.key();

    let scores = match outcome {
        Outcome::AWins => Some((1.0, 0.0)),
        Outcome::BWins => Some((0.0, 1.0)),
        Outcome::Tie => Some((0.5, 0.5)),
        Outcome::BothBad => None,
    };

    if let (Some((score_a, score_b)), false) = (scores, same_key) {
        let expected_a = expected_score(a.rating, b.rating);
        let expected_b = 1.0 - expected_a;
        new_a.rating = a.rating + k_factor * (score_a - expected_a);
        new_b.rating = b.rating + k_factor * (score_b - expected_b);
    }

    if same_key {
        // One row, two appearances in the battle.
        new_a.battles += 1;
        match outcome {
            Outcome::AWins | Outcome::BWins => {
                new_a.wins += 1;
                new_a.losses += 1;
            }
            Outcome::Tie => new_a.ties += 1,
            Outcome::BothBad => {}
        }
        new_b = new_a.clone();
    } else {
        new_a.battles += 1;
        new_b.battles += 1;
        match outcome {
            Outcome::AWins => {
                new_a.wins += 1;
                new_b.losses += 1;
            }
            Outcome::BWins => {
                new_a.losses += 1;
                new_b.wins += 1;
            }
            Outcome::Tie => {
                new_a.ties += 1;
                new_b.ties += 1;
            }
            Outcome::BothBad => {}
        }
    }

    let deltas = RatingDeltas {
        agent_a: RatingChange::between(a, &new_a),
        agent_b: RatingChange::between(b, &new_b),
    };
    (new_a, new_b, deltas)
}
