//! Application Configuration Module
//!
//! Loads the interviewer's settings from environment variables into a single
//! struct that `main` uses to wire collaborators into the service.

use interviewer_core::policy::WorkflowPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Without a key every collaborator runs on its deterministic fallback.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub log_level: Level,
    pub session_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub policy: WorkflowPolicy,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidNumber { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: (Optional) Enables the LLM evaluator, question generator, transcription and speech.
    // *   `OPENAI_BASE_URL`: (Optional) Defaults to "https://api.openai.com/v1".
    // *   `CHAT_MODEL`: (Optional) Defaults to "gpt-4o".
    // *   `TRANSCRIPTION_MODEL`: (Optional) Defaults to "whisper-1".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    // *   `SESSION_DIR`: (Optional) Directory for session snapshots. In-memory when unset.
    // *   `ARCHIVE_DIR`: (Optional) Directory for recorded answers. Not archived when unset.
    // *   `PROMPTS_DIR`: (Optional) Markdown prompt overrides.
    // *   `INTERVIEW_QUESTION_COUNT`, `INTERVIEW_MAX_DURATION_MINUTES`,
    //     `INTERVIEW_MIN_RESPONSE_CHARS`, `INTERVIEW_TURN_TIMEOUT_SECS`: (Optional) policy overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let openai_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let transcription_model =
            env::var("TRANSCRIPTION_MODEL").unwrap_or_else(|_| "whisper-1".to_string());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let mut policy = WorkflowPolicy::default();
        if let Some(count) = number("INTERVIEW_QUESTION_COUNT")? {
            policy.question_count = count;
        }
        if let Some(minutes) = number("INTERVIEW_MAX_DURATION_MINUTES")? {
            policy.default_max_duration_minutes = minutes;
        }
        if let Some(chars) = number("INTERVIEW_MIN_RESPONSE_CHARS")? {
            policy.min_response_chars = chars;
        }
        if let Some(secs) = number("INTERVIEW_TURN_TIMEOUT_SECS")? {
            policy.turn_timeout_secs = secs;
        }

        Ok(Self {
            openai_api_key,
            openai_base_url,
            chat_model,
            transcription_model,
            log_level,
            session_dir: env::var_os("SESSION_DIR").map(PathBuf::from),
            archive_dir: env::var_os("ARCHIVE_DIR").map(PathBuf::from),
            prompts_dir: env::var_os("PROMPTS_DIR").map(PathBuf::from),
            policy,
        })
    }
}

fn number<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
