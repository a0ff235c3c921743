// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Lookup order: `/etc/hoprelay/hoprelay.toml`, then
//! `~/.config/hoprelay/hoprelay.toml`, then `./hoprelay.toml`, then
//! `HOPRELAY_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::HoprelayConfig;

/// Config sections addressable through `HOPRELAY_<SECTION>_<KEY>`.
const ENV_SECTIONS: &[&str] = &[
    "relay",
    "retry",
    "scheduler",
    "health",
    "retention",
    "storage",
    "vault",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
pub fn load_config() -> Result<HoprelayConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<HoprelayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(HoprelayConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<HoprelayConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(HoprelayConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment used by [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(HoprelayConfig::default()));
    for path in config_file_candidates() {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Config file locations, lowest precedence first.
pub fn config_file_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/hoprelay/hoprelay.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("hoprelay/hoprelay.toml"));
    }
    paths.push(PathBuf::from("hoprelay.toml"));
    paths
}

/// Environment provider mapping `HOPRELAY_HEALTH_PROBE_INTERVAL_SECS` to
/// `health.probe_interval_secs`.
///
/// Only the leading section name is split off, so underscores inside key
/// names survive.
fn env_provider() -> Env {
    Env::prefixed("HOPRELAY_")
        .filter(|key| !key.as_str().eq_ignore_ascii_case("vault_key"))
        .map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key
}
