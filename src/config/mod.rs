use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_API_URL: &str = "http://localhost:6689";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid sync config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid sync config: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EnvConfig {
    pub api_url: String,
}

impl EnvConfig {
    /// Resolve the backend base URL.
    ///
    /// In the browser both `window.ENV.API_URL` (documented) and
    /// `window.ENV.api_url` (legacy) are honoured; natively the
    /// `HULUNOTE_API_URL` and `API_URL` environment variables are.
    pub fn new() -> Self {
        Self {
            api_url: Self::lookup_api_url().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn lookup_api_url() -> Option<String> {
        let window = web_sys::window()?;
        let env = window.get("ENV")?;
        if env.is_undefined() || !env.is_object() {
            return None;
        }
        ["API_URL", "api_url"].into_iter().find_map(|k| {
            js_sys::Reflect::get(&env, &k.into())
                .ok()
                .and_then(|v| v.as_string())
                .filter(|s| !s.trim().is_empty())
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn lookup_api_url() -> Option<String> {
        ["HULUNOTE_API_URL", "API_URL"]
            .into_iter()
            .find_map(|k| std::env::var(k).ok().filter(|s| !s.trim().is_empty()))
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which reconciliation strategy a coordinator runs. Only one is ever active.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Surgical,
    Diff,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncConfig {
    pub strategy: StrategyKind,

    /// First retry delay after a network failure; doubles per attempt.
    pub retry_base_ms: i64,
    pub retry_max_ms: i64,

    /// Attempts before an intent is handed to the offline queue (or dropped).
    pub max_attempts: u32,

    /// While offline, at most one probe request per interval.
    pub offline_probe_ms: i64,

    /// Upper bound of backend calls per flush.
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Surgical,
            retry_base_ms: 2_000,
            retry_max_ms: 60_000,
            max_attempts: 5,
            offline_probe_ms: 15_000,
            batch_size: 50,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: SyncConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch-size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max-attempts must be at least 1".into()));
        }
        if self.retry_base_ms < 0 || self.retry_max_ms < self.retry_base_ms {
            return Err(ConfigError::Invalid(
                "retry-max-ms must be >= retry-base-ms >= 0".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> i64 {
        let shift = attempt.saturating_sub(1).min(20);
        self.retry_base_ms
            .saturating_mul(1_i64 << shift)
            .min(self.retry_max_ms)
    }
}
