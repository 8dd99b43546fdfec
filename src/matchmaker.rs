//! Pick two provider configurations for a battle.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::providers::{ProviderConfig, ProviderKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPair {
    pub a: ProviderConfig,
    pub b: ProviderConfig,
    /// Both sides run on the same provider kind
    pub same_framework: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("No providers are available for matchmaking")]
    NoProviders,
}

pub struct Matchmaker {
    pool: Vec<ProviderConfig>,
    rng: Mutex<StdRng>,
}

impl Matchmaker {
    pub fn new(pool: Vec<ProviderConfig>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pool,
            rng: Mutex::new(rng),
        }
    }

    /// Keep only the configs whose provider has a registered adapter.
    pub fn restricted_to(pool: Vec<ProviderConfig>, available: &[ProviderKind], seed: Option<u64>) -> Self {
        let pool = pool
            .into_iter()
            .filter(|config| available.contains(&config.kind))
            .collect();
        Self::new(pool, seed)
    }

    pub fn pool(&self) -> &[ProviderConfig] {
        &self.pool
    }

    pub fn select_pair(&self) -> Result<MatchPair, MatchmakingError> {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let a = self
            .pool
            .choose(&mut *rng)
            .ok_or(MatchmakingError::NoProviders)?
            .clone();

        let other_kinds: Vec<&ProviderConfig> =
            self.pool.iter().filter(|c| c.kind != a.kind).collect();
        if let Some(b) = other_kinds.choose(&mut *rng) {
            return Ok(MatchPair {
                a,
                b: (*b).clone(),
                same_framework: false,
            });
        }

        // Only one kind left: prefer a different model of it.
        let other_models: Vec<&ProviderConfig> = self
            .pool
            .iter()
            .filter(|c| c.kind == a.kind && c.model != a.model)
            .collect();
        let b = other_models
            .choose(&mut *rng)
            .map(|c| (*c).clone())
            .unwrap_or_else(|| a.clone());

        tracing::debug!(provider = %a.kind, "Only one provider kind available; same-framework battle");
        Ok(MatchPair {
            a,
            b,
            same_framework: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kind: ProviderKind, model: Option<&str>) -> ProviderConfig {
        ProviderConfig::new(kind, model.map(str::to_string))
    }

    #[test]
    fn test_empty_pool_has_no_providers() {
        let mm = Matchmaker::new(vec![], Some(1));
        assert_eq!(mm.select_pair().unwrap_err(), MatchmakingError::NoProviders);
    }

    #[test]
    fn test_prefers_different_kinds() {
        let mm = Matchmaker::new(
            vec![
                cfg(ProviderKind::Stagehand, None),
                cfg(ProviderKind::Smooth, None),
                cfg(ProviderKind::Notte, None),
            ],
            Some(7),
        );
        for _ in 0..50 {
            let pair = mm.select_pair().unwrap();
            assert_ne!(pair.a.kind, pair.b.kind);
            assert!(!pair.same_framework);
        }
    }

    #[test]
    fn test_single_kind_falls_back_to_other_model() {
        let mm = Matchmaker::new(
            vec![
                cfg(ProviderKind::BrowserUse, Some("openai/gpt-4.1")),
                cfg(ProviderKind::BrowserUse, Some("google/gemini-2.5-flash")),
            ],
            Some(3),
        );
        let pair = mm.select_pair().unwrap();
        assert!(pair.same_framework);
        assert_ne!(pair.a.model, pair.b.model);
    }

    #[test]
    fn test_single_config_plays_itself() {
        let mm = Matchmaker::new(vec![cfg(ProviderKind::Smooth, None)], Some(3));
        let pair = mm.select_pair().unwrap();
        assert!(pair.same_framework);
        assert_eq!(pair.a, pair.b);
    }

    #[test]
    fn test_restricted_to_registered_kinds() {
        let mm = Matchmaker::restricted_to(
            vec![cfg(ProviderKind::Stagehand, None), cfg(ProviderKind::Smooth, None)],
            &[ProviderKind::Smooth],
            None,
        );
        assert_eq!(mm.pool(), &[cfg(ProviderKind::Smooth, None)]);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let pool = vec![
            cfg(ProviderKind::Stagehand, None),
            cfg(ProviderKind::Smooth, None),
            cfg(ProviderKind::Notte, None),
            cfg(ProviderKind::BrowserUse, None),
        ];
        let first = Matchmaker::new(pool.clone(), Some(42));
        let second = Matchmaker::new(pool, Some(42));
        for _ in 0..10 {
            assert_eq!(first.select_pair().unwrap(), second.select_pair().unwrap());
        }
    }
}
