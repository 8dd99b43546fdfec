//! Configuration management for the agent arena.
//!
//! Configuration is read from environment variables:
//! - `HOST` / `PORT` - Optional. Listen address. Defaults to `127.0.0.1:8080`.
//! - `DEV_MODE` - Optional. Disables bearer auth. Defaults to `false`.
//! - `JWT_SECRET` - Required unless `DEV_MODE` is set.
//! - `ARENA_STORE` - Optional. `memory` or `sqlite`. Defaults to `sqlite`.
//! - `ARENA_DATA_DIR` - Optional. Directory for the sqlite database. Defaults to `./data`.
//! - `MAX_INSTRUCTION_LENGTH` - Optional. Defaults to `5000`.
//! - `LAUNCH_TIMEOUT_SECS` - Optional. Per-adapter launch timeout. Defaults to `30`.
//! - `ARENA_PROVIDER_POOL` - Optional. Comma separated `kind[:model]` entries.
//! - `AGENT_SERVER_TOKEN` - Bearer credential for direct-remote providers.
//! - `STAGEHAND_AGENT_URL` / `NOTTE_AGENT_URL` - Direct-remote endpoints.
//! - `SMOOTH_API_URL` / `SMOOTH_API_KEY` - Submit-then-poll task API.
//! - `SMOOTH_POLL_INTERVAL_MS` / `SMOOTH_MAX_POLL_ATTEMPTS` - Tracker policy.
//! - `BROWSERBASE_API_URL` / `BROWSERBASE_API_KEY` / `BROWSERBASE_PROJECT_ID` - Remote browsers.
//! - `OPENROUTER_API_KEY` - LLM credential for the local step loop.
//! - `BOUNDED_STEP_MAX_STEPS` - Optional. Defaults to `30`.
//! - `BOUNDED_STEP_DEFAULT_MODEL` - Optional. Model used when no hint is given.
//! - `RATING_K_FACTOR` - Optional. Defaults to `32`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::providers::{ProviderConfig, ProviderKind};
use crate::store::StoreType;

pub const DEFAULT_MAX_INSTRUCTION_LENGTH: usize = 5000;
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// 600 polls at 3 seconds is 30 minutes.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 600;
pub const DEFAULT_MAX_STEPS: u32 = 30;
pub const DEFAULT_K_FACTOR: f64 = 32.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Direct-remote provider endpoints and their shared server credential.
#[derive(Debug, Clone, Default)]
pub struct DirectRemoteConfig {
    pub stagehand_url: Option<String>,
    pub notte_url: Option<String>,
    pub server_token: Option<String>,
}

impl DirectRemoteConfig {
    pub fn endpoint_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Stagehand => self.stagehand_url.as_deref(),
            ProviderKind::Notte => self.notte_url.as_deref(),
            _ => None,
        }
    }
}

/// Submit-then-poll task API settings.
#[derive(Debug, Clone)]
pub struct SmoothConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.smooth.sh/api/v1".to_string(),
            api_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Remote browser session settings (used by the local step loop).
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.browserbase.com".to_string(),
            api_key: None,
            project_id: None,
        }
    }
}

/// Local bounded-step agent settings.
#[derive(Debug, Clone)]
pub struct BoundedStepConfig {
    pub openrouter_api_key: Option<String>,
    pub max_steps: u32,
    pub default_model: String,
}

impl Default for BoundedStepConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            max_steps: DEFAULT_MAX_STEPS,
            default_model: "google/gemini-2.5-flash".to_string(),
        }
    }
}

/// Arena configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Disables bearer auth; every caller is `dev-user`
    pub dev_mode: bool,

    /// HS256 secret for bearer tokens
    pub jwt_secret: Option<String>,

    pub store_type: StoreType,

    pub data_dir: PathBuf,

    pub max_instruction_length: usize,

    pub launch_timeout: Duration,

    /// Provider configurations eligible for matchmaking
    pub provider_pool: Vec<ProviderConfig>,

    pub k_factor: f64,

    pub direct: DirectRemoteConfig,

    pub smooth: SmoothConfig,

    pub browser: BrowserConfig,

    pub bounded_step: BoundedStepConfig,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn env_url(name: &str) -> Result<Option<String>, ConfigError> {
    match env_opt(name) {
        Some(raw) => {
            url::Url::parse(&raw)
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))?;
            Ok(Some(raw.trim_end_matches('/').to_string()))
        }
        None => Ok(None),
    }
}

/// Parse `kind[:model]` entries, e.g. `smooth,browser-use:openai/gpt-4.1`.
pub fn parse_provider_pool(raw: &str) -> Result<Vec<ProviderConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (kind, model) = match entry.split_once(':') {
                Some((kind, model)) => (kind.trim(), Some(model.trim().to_string())),
                None => (entry, None),
            };
            let kind = ProviderKind::from_str(kind).map_err(|e| {
                ConfigError::InvalidValue("ARENA_PROVIDER_POOL".to_string(), e.to_string())
            })?;
            Ok(ProviderConfig::new(kind, model.filter(|m| !m.is_empty())))
        })
        .collect()
}

fn default_provider_pool() -> Vec<ProviderConfig> {
    ProviderKind::ALL
        .iter()
        .map(|kind| ProviderConfig::new(*kind, None))
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `JWT_SECRET` is not set outside dev mode,
    /// and `ConfigError::InvalidValue` for unparsable numbers, URLs or pool entries.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dev_mode = crate::util::env_var_bool("DEV_MODE", false);
        let jwt_secret = env_opt("JWT_SECRET");
        if !dev_mode && jwt_secret.is_none() {
            return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()));
        }

        let host = env_opt("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = env_parse("PORT", 8080u16)?;

        let store_type = env_opt("ARENA_STORE")
            .map(|s| StoreType::from_str_lossy(&s))
            .unwrap_or_default();
        let data_dir = env_opt("ARENA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let max_instruction_length =
            env_parse("MAX_INSTRUCTION_LENGTH", DEFAULT_MAX_INSTRUCTION_LENGTH)?;
        let launch_timeout = Duration::from_secs(env_parse(
            "LAUNCH_TIMEOUT_SECS",
            DEFAULT_LAUNCH_TIMEOUT.as_secs(),
        )?);

        let provider_pool = match env_opt("ARENA_PROVIDER_POOL") {
            Some(raw) => parse_provider_pool(&raw)?,
            None => default_provider_pool(),
        };

        let k_factor = env_parse("RATING_K_FACTOR", DEFAULT_K_FACTOR)?;

        let direct = DirectRemoteConfig {
            stagehand_url: env_url("STAGEHAND_AGENT_URL")?,
            notte_url: env_url("NOTTE_AGENT_URL")?,
            server_token: env_opt("AGENT_SERVER_TOKEN"),
        };

        let smooth_defaults = SmoothConfig::default();
        let smooth = SmoothConfig {
            api_url: env_url("SMOOTH_API_URL")?.unwrap_or(smooth_defaults.api_url),
            api_key: env_opt("SMOOTH_API_KEY"),
            poll_interval: Duration::from_millis(env_parse(
                "SMOOTH_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL.as_millis() as u64,
            )?),
            max_poll_attempts: env_parse("SMOOTH_MAX_POLL_ATTEMPTS", DEFAULT_MAX_POLL_ATTEMPTS)?,
        };

        let browser_defaults = BrowserConfig::default();
        let browser = BrowserConfig {
            api_url: env_url("BROWSERBASE_API_URL")?.unwrap_or(browser_defaults.api_url),
            api_key: env_opt("BROWSERBASE_API_KEY"),
            project_id: env_opt("BROWSERBASE_PROJECT_ID"),
        };

        let bounded_defaults = BoundedStepConfig::default();
        let bounded_step = BoundedStepConfig {
            openrouter_api_key: env_opt("OPENROUTER_API_KEY"),
            max_steps: env_parse("BOUNDED_STEP_MAX_STEPS", DEFAULT_MAX_STEPS)?,
            default_model: env_opt("BOUNDED_STEP_DEFAULT_MODEL")
                .unwrap_or(bounded_defaults.default_model),
        };

        Ok(Self {
            host,
            port,
            dev_mode,
            jwt_secret,
            store_type,
            data_dir,
            max_instruction_length,
            launch_timeout,
            provider_pool,
            k_factor,
            direct,
            smooth,
            browser,
            bounded_step,
        })
    }

    /// Create a config for tests: dev mode, in-memory store, no providers configured.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            dev_mode: true,
            jwt_secret: None,
            store_type: StoreType::Memory,
            data_dir: PathBuf::from("./data"),
            max_instruction_length: DEFAULT_MAX_INSTRUCTION_LENGTH,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            provider_pool: default_provider_pool(),
            k_factor: DEFAULT_K_FACTOR,
            direct: DirectRemoteConfig::default(),
            smooth: SmoothConfig::default(),
            browser: BrowserConfig::default(),
            bounded_step: BoundedStepConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_provider_pool_reads_models() {
        let pool = parse_provider_pool("smooth, browser-use:openai/gpt-4.1 ,notte").unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[0].kind, ProviderKind::Smooth);
        assert_eq!(pool[1].kind, ProviderKind::BrowserUse);
        assert_eq!(pool[1].model.as_deref(), Some("openai/gpt-4.1"));
        assert_eq!(pool[2].model, None);
    }

    #[test]
    fn parse_provider_pool_rejects_unknown_kind() {
        let err = parse_provider_pool("smooth,selenium").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "ARENA_PROVIDER_POOL"));
    }

    #[test]
    fn direct_endpoint_lookup_is_per_kind() {
        let direct = DirectRemoteConfig {
            stagehand_url: Some("https://stagehand.example".to_string()),
            notte_url: None,
            server_token: None,
        };
        assert_eq!(
            direct.endpoint_for(ProviderKind::Stagehand),
            Some("https://stagehand.example")
        );
        assert_eq!(direct.endpoint_for(ProviderKind::Notte), None);
        assert_eq!(direct.endpoint_for(ProviderKind::Smooth), None);
    }
}
