// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `hoprelay status` command implementation.
//!
//! Reads identities, worker groups, pairs, and mapping counts from storage.
//! `--json` prints the raw statistics for scripting; otherwise a summary is
//! printed, colored when stdout is a terminal and `--plain` is not given.

use std::io::IsTerminal;

use hoprelay_config::HoprelayConfig;
use hoprelay_core::{HealthState, RelayError};
use hoprelay_relay::OrchestratorStats;

use crate::app;

/// Run the `hoprelay status` command.
pub async fn run_status(config: HoprelayConfig, json: bool, plain: bool) -> Result<(), RelayError> {
    let app = app::open(config, false).await?;
    let stats = app.orchestrator.stats().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&stats, use_color);
    }
    app.orchestrator.shutdown().await;
    Ok(())
}

/// `assigned/max (pct%)`.
fn format_load(assigned: u32, max: u32) -> String {
    if max == 0 {
        return format!("{assigned}/0");
    }
    let pct = u64::from(assigned) * 100 / u64::from(max);
    format!("{assigned}/{max} ({pct}%)")
}

fn health_marker(health: HealthState, use_color: bool) -> String {
    if !use_color {
        let tag = match health {
            HealthState::Healthy => "[OK]",
            HealthState::Degraded => "[WARN]",
            HealthState::Unreachable | HealthState::Unauthorized => "[FAIL]",
        };
        return format!("{tag} {health}");
    }
    use colored::Colorize;
    match health {
        HealthState::Healthy => format!("{} {}", "✓".green(), health.to_string().green()),
        HealthState::Degraded => format!("{} {}", "!".yellow(), health.to_string().yellow()),
        HealthState::Unreachable | HealthState::Unauthorized => {
            format!("{} {}", "✗".red(), health.to_string().red())
        }
    }
}

fn print_counts(title: &str, counts: &[(String, u64)]) {
    if counts.is_empty() {
        println!("    {title:<12} none");
        return;
    }
    let joined: Vec<String> = counts.iter().map(|(k, n)| format!("{k}={n}")).collect();
    println!("    {title:<12} {}", joined.join(" "));
}

fn print_status(stats: &OrchestratorStats, use_color: bool) {
    println!();
    println!("  hoprelay status");
    println!("  {}", "-".repeat(35));

    println!("  Identities");
    if stats.scheduler.identities.is_empty() {
        println!("    none registered (add one with: hoprelay identity add)");
    }
    for identity in &stats.scheduler.identities {
        println!(
            "    {:<16} {:<20} load {:<14} priority {}",
            identity.name,
            health_marker(identity.health, use_color),
            format_load(identity.assigned, identity.max_pairs),
            identity.priority
        );
    }

    println!();
    println!("  Worker groups");
    if stats.scheduler.groups.is_empty() {
        println!("    none");
    }
    for group in &stats.scheduler.groups {
        println!(
            "    {:<24} {:<16} {:<14} {}",
            group.id,
            group.identity,
            format_load(group.members.len() as u32, group.capacity),
            group.liveness
        );
    }

    println!();
    println!("  Totals");
    print_counts("pairs", &stats.system.pairs_by_status);
    print_counts("mappings", &stats.system.mappings_by_state);
    print_counts("groups", &stats.system.groups_by_liveness);
    if !stats.scheduler.stranded.is_empty() {
        let ids: Vec<String> = stats
            .scheduler
            .stranded
            .iter()
            .map(ToString::to_string)
            .collect();
        let line = format!("stranded pairs: {}", ids.join(", "));
        if use_color {
            use colored::Colorize;
            println!("    {}", line.red());
        } else {
            println!("    {line}");
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_shows_percentage() {
        assert_eq!(format_load(5, 20), "5/20 (25%)");
        assert_eq!(format_load(30, 30), "30/30 (100%)");
        assert_eq!(format_load(0, 0), "0/0");
    }

    #[test]
    fn plain_markers_carry_the_state() {
        assert_eq!(health_marker(HealthState::Healthy, false), "[OK] healthy");
        assert_eq!(
            health_marker(HealthState::Unauthorized, false),
            "[FAIL] unauthorized"
        );
    }
}
