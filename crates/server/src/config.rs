//! Runtime configuration read from the environment (after `.env` is loaded)

use std::path::PathBuf;
use std::time::Duration;

use engine::converter::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use engine::LlmConfig;

pub const DEFAULT_DB_PATH: &str = "data/strategy_lab.db";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub data_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// `None` when no API key is configured
    pub llm: Option<LlmConfig>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let timeout_secs = non_empty("STRATEGY_LAB_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let llm = non_empty("LLM_API_KEY")
            .or_else(|| non_empty("GROQ_API_KEY"))
            .map(|api_key| LlmConfig {
                api_key,
                base_url: non_empty("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: non_empty("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            });

        Self {
            db_path: non_empty("STRATEGY_LAB_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            data_dir: non_empty("STRATEGY_LAB_DATA_DIR").map(PathBuf::from),
            timeout: Duration::from_secs(timeout_secs),
            llm,
        }
    }
}
