//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    default_filter_string, init_logging, redact_if_sensitive, LogFormat, LoggingConfig,
};

#[test]
fn test_logging_initialization_once() {
    // The global subscriber can only be installed once per process.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn);

    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}

#[test]
fn test_secret_redaction_tokens() {
    assert_eq!(
        redact_if_sensitive("access_token", "BQD9x..."),
        "[REDACTED]"
    );
    assert_eq!(
        redact_if_sensitive("refresh_token", "AQA1y..."),
        "[REDACTED]"
    );
    assert_eq!(redact_if_sensitive("client_secret", "s3cr3t"), "[REDACTED]");
}

#[test]
fn test_redaction_can_be_disabled() {
    let config = LoggingConfig::default().with_secret_redaction(false);
    assert_eq!(config.redact("access_token", "abc"), "abc");

    let config = LoggingConfig::default();
    assert_eq!(config.redact("access_token", "abc"), "[REDACTED]");
}

#[test]
fn test_email_redaction() {
    let redacted = redact_if_sensitive("account", "user@example.com");

    assert!(redacted.starts_with('u'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_normal_values_pass_through() {
    assert_eq!(redact_if_sensitive("provider", "deezer"), "deezer");
    assert_eq!(redact_if_sensitive("operation", "saved_tracks"), "saved_tracks");
    assert_eq!(redact_if_sensitive("job_id", "job_123"), "job_123");
}

#[test]
fn test_default_filter_quiets_sqlx() {
    let filter = default_filter_string(LogLevel::Trace);
    assert!(filter.contains("core_sync=trace"));
    assert!(filter.contains("core_library=trace"));
    assert!(filter.contains("sqlx=warn"));
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_secret_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_secrets);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
