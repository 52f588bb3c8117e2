//! Solace configuration: defaults, optional TOML file, then `PAGI_SOLACE__*` environment.
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | host / port | 127.0.0.1 / 5000 | Gateway bind address. |
//! | log_path | ./data/logs/user_sessions.log | NDJSON interaction log. |
//! | export_path | ./data/logs/sessions_export.csv | CSV export target. |
//! | llm_mode | mock | "mock" or "live" (OpenRouter-compatible endpoint). |
//! | max_new_tokens | 100 | Generation budget per reply. |
//! | context_turns | 3 | Turns of history included in the prompt. |
//! | follow_up_probability | 0.3 | Chance of appending a follow-up question. |
//! | session_ttl_secs | 3600 | Idle sessions older than this are evicted (0 = never). |
//! | max_sessions | 10000 | Least recently seen session is evicted beyond this. |
//!
//! API keys are never read from the file: `PAGI_LLM_API_KEY` > `OPENROUTER_API_KEY`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_CONFIG_PATH: &str = "PAGI_SOLACE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/solace.toml";
const ENV_LLM_API_KEY: &str = "PAGI_LLM_API_KEY";
const ENV_OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";

/// LLM invocation mode: mock (offline deterministic) or live (external API).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    Mock,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolaceConfig {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub log_path: String,
    pub export_path: String,
    #[serde(default)]
    pub llm_mode: LlmMode,
    pub llm_model: String,
    pub llm_api_url: String,
    pub max_new_tokens: u32,
    pub context_turns: usize,
    pub min_response_len: usize,
    pub follow_up_probability: f64,
    /// Fixed seed for the response enhancer (reproducible replies). Unset = entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
    pub sweep_interval_secs: u64,
    /// Replaces the built-in English stopword list (one word per line).
    #[serde(default)]
    pub stopwords_path: Option<String>,
    /// Extra denylist terms merged into the content filter (one term per line).
    #[serde(default)]
    pub flagged_terms_path: Option<String>,
    /// When set, operator tracing is also written to a daily rolling file here.
    #[serde(default)]
    pub operator_log_dir: Option<String>,
}

impl Default for SolaceConfig {
    fn default() -> Self {
        Self {
            app_name: "PAGI Solace".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5000,
            log_path: "./data/logs/user_sessions.log".to_string(),
            export_path: "./data/logs/sessions_export.csv".to_string(),
            llm_mode: LlmMode::Mock,
            llm_model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            llm_api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            max_new_tokens: 100,
            context_turns: 3,
            min_response_len: 5,
            follow_up_probability: 0.3,
            rng_seed: None,
            session_ttl_secs: 3600,
            max_sessions: 10_000,
            sweep_interval_secs: 60,
            stopwords_path: None,
            flagged_terms_path: None,
            operator_log_dir: None,
        }
    }
}

impl SolaceConfig {
    /// Load config. Precedence: env `PAGI_SOLACE__*` > file (`PAGI_SOLACE_CONFIG` or `config/solace.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&SolaceConfig::default())?;
        let builder = config::Config::builder().add_source(defaults);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };
        let built = builder
            .add_source(config::Environment::with_prefix("PAGI_SOLACE").separator("__"))
            .build()?;
        let mut cfg: SolaceConfig = built.try_deserialize()?;
        cfg.follow_up_probability = cfg.follow_up_probability.clamp(0.0, 1.0);
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(&self.log_path)
    }

    /// Session TTL, `None` when eviction by age is disabled.
    pub fn session_ttl(&self) -> Option<std::time::Duration> {
        (self.session_ttl_secs > 0).then(|| std::time::Duration::from_secs(self.session_ttl_secs))
    }

    /// Generation API key from the environment (never from the config file).
    pub fn api_key() -> Option<String> {
        std::env::var(ENV_LLM_API_KEY)
            .ok()
            .or_else(|| std::env::var(ENV_OPENROUTER_API_KEY).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
