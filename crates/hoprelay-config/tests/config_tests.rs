// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the hoprelay configuration system.

use hoprelay_config::diagnostic::{ConfigError, suggest_key};
use hoprelay_config::model::HoprelayConfig;
use hoprelay_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};
use hoprelay_core::IdentityKind;

#[test]
fn full_config_deserializes() {
    let toml = r#"
[relay]
log_level = "debug"
hop_timeout_secs = 5
max_deferred_events = 8
deferred_ttl_secs = 60

[retry]
max_attempts = 5
base_backoff_ms = 100
max_backoff_ms = 2000
jitter = false

[scheduler]
group_capacity = 10
default_identity_capacity = 40

[health]
probe_interval_secs = 60
unreachable_after = 2

[retention]
horizon_days = 7

[storage]
database_path = "/tmp/hoprelay-test.db"
wal_mode = false

[[identities]]
name = "alpha"
max_pairs = 20
priority = 5

[[identities]]
name = "poster"
kind = "bot_token"

[[pairs]]
name = "news"
source = "src-news"
relay = "relay-news"
destination = "dst-news"
identity = "alpha"
destination_identity = "poster"
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.relay.log_level, "debug");
    assert_eq!(config.relay.hop_timeout_secs, 5);
    assert_eq!(config.relay.deferred_ttl(), std::time::Duration::from_secs(60));
    assert_eq!(config.retry.max_attempts, 5);
    assert!(!config.retry.jitter);
    assert_eq!(config.scheduler.group_capacity, 10);
    assert_eq!(config.health.unreachable_after, 2);
    assert_eq!(config.retention.horizon_days, 7);
    assert!(!config.storage.wal_mode);
    assert_eq!(config.identities.len(), 2);
    assert_eq!(config.identities[1].kind, IdentityKind::BotToken);
    assert_eq!(config.identities[0].max_pairs, Some(20));
    assert_eq!(config.pairs[0].destination_identity.as_deref(), Some("poster"));
    assert!(config.pairs[0].enabled);
}

#[test]
fn empty_config_uses_defaults() {
    let config = load_config_from_str("").expect("empty config is valid");
    let defaults = HoprelayConfig::default();
    assert_eq!(config.retry.max_attempts, defaults.retry.max_attempts);
    assert_eq!(config.scheduler.group_capacity, 25);
    assert_eq!(config.health.unreachable_after, 3);
    assert_eq!(config.retention.horizon_days, 30);
    assert!(config.identities.is_empty());
}

#[test]
fn unknown_key_is_reported_with_suggestion() {
    let toml = r#"
[retry]
max_attemps = 4
"#;

    let errors = load_and_validate_str(toml).expect_err("typo should fail");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert!(key.ends_with("max_attemps"), "key was {key}");
            assert_eq!(suggestion.as_deref(), Some("max_attempts"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[health]
unreachable_after = "three"
"#;

    let errors = load_and_validate_str(toml).expect_err("bad type should fail");
    assert!(matches!(errors[0], ConfigError::InvalidType { .. }));
}

#[test]
fn pair_missing_required_field_is_reported() {
    let toml = r#"
[[pairs]]
name = "news"
source = "a"
relay = "b"
identity = "alpha"
"#;

    let errors = load_and_validate_str(toml).expect_err("missing destination");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::MissingKey { key } if key.contains("destination"))),
        "got {errors:?}"
    );
}

#[test]
fn validation_runs_after_deserialization() {
    let toml = r#"
[scheduler]
group_capacity = 0
"#;

    let errors = load_and_validate_str(toml).expect_err("zero capacity");
    assert!(matches!(errors[0], ConfigError::Validation { .. }));
}

#[test]
fn suggest_key_ignores_unrelated_names() {
    assert_eq!(suggest_key("zzz", &["horizon_days", "sweep_interval_secs"]), None);
}

#[test]
fn env_overrides_file_values() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "custom.toml",
            r#"
[retry]
max_attempts = 2

[health]
probe_interval_secs = 120
"#,
        )?;
        jail.set_env("HOPRELAY_RETRY_MAX_ATTEMPTS", "7");
        jail.set_env("HOPRELAY_VAULT_KEY", "not-a-config-key");

        let config = load_and_validate_path(std::path::Path::new("custom.toml"))
            .map_err(|errors| format!("{errors:?}"))?;
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.health.probe_interval_secs, 120);
        Ok(())
    });
}
