use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    DEFAULT_ANALYSIS_TRIGGER_TOKEN, DEFAULT_DELETION_MESSAGE, DEFAULT_POSTS_THRESHOLD,
    DEFAULT_RECENT_TOPICS_LIMIT, DEFAULT_VECTOR_SIMILARITY_THRESHOLD,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Discourse
    pub discourse_base_url: String,
    pub discourse_api_key: String,
    pub discourse_api_username: String,

    // Inbound authentication
    pub webhook_secret: String,
    pub app_api_key: String,

    // Language model
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,

    // Summary projects
    pub summary_base_url: String,
    pub summary_api_key: String,
    pub summary_embed_base_url: String,

    // Vector search (disabled when the URL is unset)
    pub vector_search_url: Option<String>,
    pub vector_search_api_key: Option<String>,
    pub vector_similarity_threshold: f32,

    // Notifications
    pub slack_webhook_url: Option<String>,

    // Behaviour
    pub dry_run: bool,
    pub posts_threshold: u64,
    pub analysis_trigger_token: Option<String>,
    pub moderation_action: ModerationAction,
    pub deletion_message: String,
    pub recent_topics_limit: usize,
    pub external_call_timeout: Duration,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
}

/// What to do with a post the moderation check rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    /// Only report the violation to the notification sink
    Notify,
    /// Report, delete the post and reply with the deletion notice
    Delete,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Discourse
            discourse_base_url: trim_base_url(&required_env("DISCOURSE_BASE_URL")?),
            discourse_api_key: required_env("DISCOURSE_API_KEY")?,
            discourse_api_username: env_or_default("DISCOURSE_API_USERNAME", "system"),

            // Inbound authentication
            webhook_secret: required_env("WEBHOOK_SECRET")?,
            app_api_key: required_env("APP_API_KEY")?,

            // Language model
            gemini_api_key: required_env("GEMINI_API_KEY")?,
            gemini_base_url: trim_base_url(&env_or_default(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            )),
            gemini_model: env_or_default("GEMINI_MODEL", "gemini-2.0-flash"),

            // Summary projects
            summary_base_url: trim_base_url(&env_or_default(
                "SUMMARY_BASE_URL",
                "http://localhost:3001/api",
            )),
            summary_api_key: required_env("SUMMARY_API_KEY")?,
            summary_embed_base_url: trim_base_url(&env_or_default(
                "SUMMARY_EMBED_BASE_URL",
                "https://delib.takahiroanno.com",
            )),

            // Vector search
            vector_search_url: optional_env("VECTOR_SEARCH_URL").map(|u| trim_base_url(&u)),
            vector_search_api_key: optional_env("VECTOR_SEARCH_API_KEY"),
            vector_similarity_threshold: parse_env_f32(
                "VECTOR_SIMILARITY_THRESHOLD",
                DEFAULT_VECTOR_SIMILARITY_THRESHOLD,
            )?,

            // Notifications
            slack_webhook_url: optional_env("SLACK_WEBHOOK_URL"),

            // Behaviour
            dry_run: parse_env_bool("DRY_RUN_MODE", false)?,
            posts_threshold: parse_env_u64("POSTS_THRESHOLD", DEFAULT_POSTS_THRESHOLD)?,
            analysis_trigger_token: trigger_token_from_env(),
            moderation_action: parse_moderation_action(&env_or_default(
                "MODERATION_ACTION",
                "notify",
            ))?,
            deletion_message: env_or_default("DELETION_MESSAGE", DEFAULT_DELETION_MESSAGE),
            recent_topics_limit: parse_env_usize(
                "RECENT_TOPICS_LIMIT",
                DEFAULT_RECENT_TOPICS_LIMIT,
            )?,
            external_call_timeout: Duration::from_secs(parse_env_u64(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                60,
            )?),

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8000)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.posts_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                name: "POSTS_THRESHOLD".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.recent_topics_limit == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RECENT_TOPICS_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.vector_similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                name: "VECTOR_SIMILARITY_THRESHOLD".to_string(),
                message: "must be between 0 and 1".to_string(),
            });
        }
        if self.external_call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "EXTERNAL_CALL_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("DISCOURSE_BASE_URL", &self.discourse_base_url),
            ("WEBHOOK_SECRET", &self.webhook_secret),
            ("APP_API_KEY", &self.app_api_key),
            ("DELETION_MESSAGE", &self.deletion_message),
        ] {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: "cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Configuration with placeholder values, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            discourse_base_url: "http://forum.invalid".to_string(),
            discourse_api_key: "test-discourse-key".to_string(),
            discourse_api_username: "system".to_string(),
            webhook_secret: "test-webhook-secret".to_string(),
            app_api_key: "test-app-key".to_string(),
            gemini_api_key: "test-gemini-key".to_string(),
            gemini_base_url: "http://gemini.invalid".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            summary_base_url: "http://summary.invalid/api".to_string(),
            summary_api_key: "test-summary-key".to_string(),
            summary_embed_base_url: "https://embed.invalid".to_string(),
            vector_search_url: None,
            vector_search_api_key: None,
            vector_similarity_threshold: DEFAULT_VECTOR_SIMILARITY_THRESHOLD,
            slack_webhook_url: None,
            dry_run: false,
            posts_threshold: DEFAULT_POSTS_THRESHOLD,
            analysis_trigger_token: Some(DEFAULT_ANALYSIS_TRIGGER_TOKEN.to_string()),
            moderation_action: ModerationAction::Notify,
            deletion_message: DEFAULT_DELETION_MESSAGE.to_string(),
            recent_topics_limit: DEFAULT_RECENT_TOPICS_LIMIT,
            external_call_timeout: Duration::from_secs(5),
            web_host: "127.0.0.1".to_string(),
            web_port: 8000,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// An explicitly empty `ANALYSIS_TRIGGER_TOKEN` disables the manual trigger.
fn trigger_token_from_env() -> Option<String> {
    match std::env::var("ANALYSIS_TRIGGER_TOKEN") {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => Some(val),
        Err(_) => Some(DEFAULT_ANALYSIS_TRIGGER_TOKEN.to_string()),
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f32(name: &str, default: f32) -> Result<f32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_moderation_action(value: &str) -> Result<ModerationAction, ConfigError> {
    match value.to_lowercase().as_str() {
        "notify" => Ok(ModerationAction::Notify),
        "delete" => Ok(ModerationAction::Delete),
        _ => Err(ConfigError::InvalidValue {
            name: "MODERATION_ACTION".to_string(),
            message: format!("must be 'notify' or 'delete', got '{value}'"),
        }),
    }
}
