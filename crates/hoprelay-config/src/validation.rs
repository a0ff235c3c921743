// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks constraints serde cannot express: positive capacities and
//! thresholds, KDF lower bounds, and that declared pairs reference declared
//! identities.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::HoprelayConfig;

/// Validate a deserialized configuration.
///
/// Collects every problem instead of stopping at the first one.
pub fn validate_config(config: &HoprelayConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    if config.relay.hop_timeout_secs == 0 {
        invalid("relay.hop_timeout_secs must be at least 1".to_string());
    }
    if config.relay.event_buffer == 0 {
        invalid("relay.event_buffer must be at least 1".to_string());
    }
    if config.retry.max_attempts == 0 {
        invalid("retry.max_attempts must be at least 1".to_string());
    }
    if config.retry.base_backoff_ms > config.retry.max_backoff_ms {
        invalid(format!(
            "retry.base_backoff_ms ({}) must not exceed retry.max_backoff_ms ({})",
            config.retry.base_backoff_ms, config.retry.max_backoff_ms
        ));
    }
    if config.scheduler.group_capacity == 0 {
        invalid("scheduler.group_capacity must be at least 1".to_string());
    }
    if config.scheduler.default_identity_capacity == 0 {
        invalid("scheduler.default_identity_capacity must be at least 1".to_string());
    }
    if config.health.probe_interval_secs == 0 {
        invalid("health.probe_interval_secs must be at least 1".to_string());
    }
    if config.health.probe_timeout_secs == 0 {
        invalid("health.probe_timeout_secs must be at least 1".to_string());
    }
    if config.health.unreachable_after == 0 {
        invalid("health.unreachable_after must be at least 1".to_string());
    }
    if config.retention.horizon_days == 0 {
        invalid("retention.horizon_days must be at least 1".to_string());
    }
    if config.storage.database_path.trim().is_empty() {
        invalid("storage.database_path must not be empty".to_string());
    }

    if config.vault.kdf_memory_cost < 32768 {
        invalid(format!(
            "vault.kdf_memory_cost must be at least 32768 (32 MiB), got {}",
            config.vault.kdf_memory_cost
        ));
    }
    if config.vault.kdf_iterations < 2 {
        invalid(format!(
            "vault.kdf_iterations must be at least 2, got {}",
            config.vault.kdf_iterations
        ));
    }
    if config.vault.kdf_parallelism < 1 {
        invalid(format!(
            "vault.kdf_parallelism must be at least 1, got {}",
            config.vault.kdf_parallelism
        ));
    }

    let mut identity_names = HashSet::new();
    for (i, identity) in config.identities.iter().enumerate() {
        if identity.name.trim().is_empty() {
            invalid(format!("identities[{i}].name must not be empty"));
        } else if !identity_names.insert(identity.name.as_str()) {
            invalid(format!("duplicate identity name `{}`", identity.name));
        }
        if identity.max_pairs == Some(0) {
            invalid(format!("identities[{i}].max_pairs must be at least 1"));
        }
    }

    let mut pair_names = HashSet::new();
    for pair in &config.pairs {
        if !pair_names.insert(pair.name.as_str()) {
            invalid(format!("duplicate pair name `{}`", pair.name));
        }
    }

    // Pairs may reference identities registered at runtime, so references
    // are only checked when the file declares identities at all.
    if !config.identities.is_empty() {
        for (i, pair) in config.pairs.iter().enumerate() {
            if !identity_names.contains(pair.identity.as_str()) {
                errors.push(ConfigError::UnknownReference {
                    name: pair.identity.clone(),
                    context: format!("pairs[{i}].identity"),
                });
            }
            if let Some(poster) = &pair.destination_identity
                && !identity_names.contains(poster.as_str())
            {
                errors.push(ConfigError::UnknownReference {
                    name: poster.clone(),
                    context: format!("pairs[{i}].destination_identity"),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
