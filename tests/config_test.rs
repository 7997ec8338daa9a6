//! Integration tests for loading configuration from the environment.

use std::time::Duration;

use discourse_moderation_bot::config::{Config, ConfigError, ModerationAction};
use serial_test::serial;

const REQUIRED: [(&str, &str); 6] = [
    ("DISCOURSE_BASE_URL", "https://forum.example.com/"),
    ("DISCOURSE_API_KEY", "discourse-key"),
    ("WEBHOOK_SECRET", "webhook-secret"),
    ("APP_API_KEY", "app-key"),
    ("GEMINI_API_KEY", "gemini-key"),
    ("SUMMARY_API_KEY", "summary-key"),
];

const OPTIONAL: [&str; 10] = [
    "VECTOR_SEARCH_URL",
    "SLACK_WEBHOOK_URL",
    "DRY_RUN_MODE",
    "POSTS_THRESHOLD",
    "ANALYSIS_TRIGGER_TOKEN",
    "MODERATION_ACTION",
    "DELETION_MESSAGE",
    "RECENT_TOPICS_LIMIT",
    "EXTERNAL_CALL_TIMEOUT_SECS",
    "VECTOR_SIMILARITY_THRESHOLD",
];

fn reset_env() {
    for (name, value) in REQUIRED {
        std::env::set_var(name, value);
    }
    for name in OPTIONAL {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_defaults() {
    reset_env();

    let config = Config::from_env().unwrap();
    config.validate().unwrap();

    assert_eq!(config.discourse_base_url, "https://forum.example.com");
    assert_eq!(config.discourse_api_username, "system");
    assert_eq!(config.posts_threshold, 6);
    assert_eq!(config.analysis_trigger_token.as_deref(), Some("#analyze"));
    assert_eq!(config.moderation_action, ModerationAction::Notify);
    assert!((config.vector_similarity_threshold - 0.85).abs() < f32::EPSILON);
    assert_eq!(config.external_call_timeout, Duration::from_secs(60));
    assert!(config.vector_search_url.is_none());
    assert!(!config.dry_run);
}

#[test]
#[serial]
fn test_overrides() {
    reset_env();
    std::env::set_var("DRY_RUN_MODE", "true");
    std::env::set_var("POSTS_THRESHOLD", "10");
    std::env::set_var("ANALYSIS_TRIGGER_TOKEN", "");
    std::env::set_var("MODERATION_ACTION", "delete");
    std::env::set_var("VECTOR_SEARCH_URL", "http://vectors.local/");

    let config = Config::from_env().unwrap();

    assert!(config.dry_run);
    assert_eq!(config.posts_threshold, 10);
    assert_eq!(config.analysis_trigger_token, None);
    assert_eq!(config.moderation_action, ModerationAction::Delete);
    assert_eq!(config.vector_search_url.as_deref(), Some("http://vectors.local"));

    reset_env();
}

#[test]
#[serial]
fn test_missing_required_variable() {
    reset_env();
    std::env::remove_var("WEBHOOK_SECRET");

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "WEBHOOK_SECRET"));

    reset_env();
}

#[test]
#[serial]
fn test_invalid_number_is_rejected() {
    reset_env();
    std::env::set_var("POSTS_THRESHOLD", "six");

    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::ParseInt { .. })
    ));

    reset_env();
}
