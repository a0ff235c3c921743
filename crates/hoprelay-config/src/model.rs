// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the hoprelay message relay.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use hoprelay_core::IdentityKind;
use serde::{Deserialize, Serialize};

/// Top-level hoprelay configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HoprelayConfig {
    /// Pipeline behavior.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Hop send retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker group sizing.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Identity probing.
    #[serde(default)]
    pub health: HealthConfig,

    /// Mapping retention sweep.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential vault settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Identities declared in config rather than registered at runtime.
    #[serde(default)]
    pub identities: Vec<IdentityDecl>,

    /// Forwarding pairs declared in config.
    #[serde(default)]
    pub pairs: Vec<PairDecl>,
}

/// Per-pair pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on a single hop send, edit, or delete.
    #[serde(default = "default_hop_timeout_secs")]
    pub hop_timeout_secs: u64,

    /// Edits and deletes held per pair while their message is still relaying.
    #[serde(default = "default_max_deferred_events")]
    pub max_deferred_events: usize,

    /// How long a deferred edit or delete waits for its message before it
    /// is dropped.
    #[serde(default = "default_deferred_ttl_secs")]
    pub deferred_ttl_secs: u64,

    /// Inbound event queue length per pair.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long shutdown waits for in-flight sends.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            hop_timeout_secs: default_hop_timeout_secs(),
            max_deferred_events: default_max_deferred_events(),
            deferred_ttl_secs: default_deferred_ttl_secs(),
            event_buffer: default_event_buffer(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl RelayConfig {
    pub fn hop_timeout(&self) -> Duration {
        Duration::from_secs(self.hop_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn deferred_ttl(&self) -> Duration {
        Duration::from_secs(self.deferred_ttl_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hop_timeout_secs() -> u64 {
    30
}

fn default_max_deferred_events() -> usize {
    64
}

fn default_deferred_ttl_secs() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    256
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Bounded exponential backoff for hop sends.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Ceiling for a single backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Randomize each delay within [50%, 100%] of its nominal value.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

/// Worker group sizing and identity defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Ceiling on pairs per worker group.
    #[serde(default = "default_group_capacity")]
    pub group_capacity: u32,

    /// `max_pairs` for identities that do not declare one.
    #[serde(default = "default_identity_capacity")]
    pub default_identity_capacity: u32,

    /// `priority` for identities that do not declare one.
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            group_capacity: default_group_capacity(),
            default_identity_capacity: default_identity_capacity(),
            default_priority: default_priority(),
        }
    }
}

fn default_group_capacity() -> u32 {
    25
}

fn default_identity_capacity() -> u32 {
    30
}

fn default_priority() -> i32 {
    1
}

/// Identity probing cadence and thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Consecutive failed probes before a degraded identity is unreachable.
    #[serde(default = "default_unreachable_after")]
    pub unreachable_after: u32,

    /// Health samples kept per identity.
    #[serde(default = "default_history_samples")]
    pub history_samples: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            unreachable_after: default_unreachable_after(),
            history_samples: default_history_samples(),
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    20
}

fn default_unreachable_after() -> u32 {
    3
}

fn default_history_samples() -> usize {
    20
}

/// Mapping retention.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Terminal mappings untouched for this many days are purged.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(u64::from(self.horizon_days) * 86_400)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_horizon_days() -> u32 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    86_400
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("hoprelay").join("hoprelay.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("hoprelay.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Credential vault configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB).
    #[serde(default = "default_kdf_memory_cost")]
    pub kdf_memory_cost: u32,

    /// Argon2id iteration count (default: 3).
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Argon2id parallelism lanes (default: 4).
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_memory_cost: default_kdf_memory_cost(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
        }
    }
}

fn default_kdf_memory_cost() -> u32 {
    65536
}

fn default_kdf_iterations() -> u32 {
    3
}

fn default_kdf_parallelism() -> u32 {
    4
}

/// An identity declared in the config file.
///
/// `secret` is imported into the vault on startup and should then be
/// removed from the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityDecl {
    pub name: String,

    #[serde(default = "default_identity_kind")]
    pub kind: IdentityKind,

    #[serde(default)]
    pub max_pairs: Option<u32>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub secret: Option<String>,
}

fn default_identity_kind() -> IdentityKind {
    IdentityKind::Session
}

/// A forwarding pair declared in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PairDecl {
    pub name: String,

    /// Source channel reference.
    pub source: String,

    /// Relay channel reference.
    pub relay: String,

    /// Destination channel reference.
    pub destination: String,

    /// Identity that owns the pair.
    pub identity: String,

    /// Optional separate credential for posting at the destination.
    #[serde(default)]
    pub destination_identity: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
