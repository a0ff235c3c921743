// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! hoprelay - relays messages from a source channel through a relay channel
//! to a destination channel.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod admin;
mod app;
mod journal;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hoprelay_config::HoprelayConfig;
use hoprelay_core::{IdentityKind, RelayError};

/// hoprelay - three-hop message relay.
#[derive(Parser, Debug)]
#[command(name = "hoprelay", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay, reading source events from stdin.
    Serve,
    /// Show identities, worker groups, and mapping counts.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Remove terminal mappings older than the retention horizon.
    Sweep,
    /// Manage identities.
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Manage forwarding pairs.
    #[command(subcommand)]
    Pair(PairCommand),
    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum IdentityCommand {
    /// List identities with health and load.
    List,
    /// Register an identity. The credential is read from
    /// HOPRELAY_IDENTITY_SECRET or prompted for.
    Add {
        name: String,
        #[arg(long, default_value = "session", value_parser = parse_kind)]
        kind: IdentityKind,
        #[arg(long)]
        max_pairs: Option<u32>,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// Remove an identity that no longer owns or posts for any pair.
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
enum PairCommand {
    /// List pairs with their group.
    List,
    /// Create a pair and assign it to its identity.
    Add {
        name: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        relay: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        identity: String,
        /// Separate identity that posts on the destination hop.
        #[arg(long)]
        poster: Option<String>,
        /// Create the pair without assigning it.
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a pair and its mappings.
    Remove { pair: String },
    /// Assign a disabled pair and start relaying it.
    Enable { pair: String },
    /// Stop relaying a pair and free its group slot.
    Disable { pair: String },
    /// Move pairs to another identity. Pairs that fit are moved even if
    /// others are rejected.
    Reassign {
        #[arg(long = "to")]
        identity: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Check a pair's identity and destination permission.
    Test { pair: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration and print a summary.
    Check,
}

fn parse_kind(raw: &str) -> Result<IdentityKind, String> {
    raw.parse()
        .map_err(|_| format!("unknown identity kind `{raw}` (expected session or bot_token)"))
}

fn load_config(path: Option<&PathBuf>) -> HoprelayConfig {
    let loaded = match path {
        Some(path) => hoprelay_config::load_and_validate_path(path),
        None => hoprelay_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            hoprelay_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

fn print_config_summary(config: &HoprelayConfig) {
    println!("config OK");
    println!("  database      {}", config.storage.database_path);
    println!("  identities    {} declared", config.identities.len());
    println!("  pairs         {} declared", config.pairs.len());
    println!(
        "  groups        up to {} pairs each",
        config.scheduler.group_capacity
    );
    println!(
        "  retry         {} attempts, {}..{} ms backoff",
        config.retry.max_attempts, config.retry.base_backoff_ms, config.retry.max_backoff_ms
    );
    println!(
        "  health        every {}s, unreachable after {} failures",
        config.health.probe_interval_secs, config.health.unreachable_after
    );
}

async fn run(cli: Cli) -> Result<(), RelayError> {
    let config = load_config(cli.config.as_ref());
    let Some(command) = cli.command else {
        println!("hoprelay: use --help for available commands");
        return Ok(());
    };
    if !matches!(command, Commands::Serve) {
        serve::init_tracing("warn");
    }

    match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Status { json, plain } => status::run_status(config, json, plain).await,
        Commands::Sweep => admin::sweep(config).await,
        Commands::Identity(IdentityCommand::List) => admin::identity_list(config).await,
        Commands::Identity(IdentityCommand::Add {
            name,
            kind,
            max_pairs,
            priority,
        }) => {
            let args = admin::IdentityArgs {
                name,
                kind,
                max_pairs,
                priority,
            };
            admin::identity_add(config, args).await
        }
        Commands::Identity(IdentityCommand::Remove { name }) => {
            admin::identity_remove(config, &name).await
        }
        Commands::Pair(PairCommand::List) => admin::pair_list(config).await,
        Commands::Pair(PairCommand::Add {
            name,
            source,
            relay,
            destination,
            identity,
            poster,
            disabled,
        }) => {
            let args = admin::PairArgs {
                name,
                source,
                relay,
                destination,
                identity,
                poster,
                disabled,
            };
            admin::pair_add(config, args).await
        }
        Commands::Pair(PairCommand::Remove { pair }) => admin::pair_remove(config, &pair).await,
        Commands::Pair(PairCommand::Enable { pair }) => {
            admin::pair_set_enabled(config, &pair, true).await
        }
        Commands::Pair(PairCommand::Disable { pair }) => {
            admin::pair_set_enabled(config, &pair, false).await
        }
        Commands::Pair(PairCommand::Reassign { identity, pairs }) => {
            admin::pair_reassign(config, &pairs, &identity).await
        }
        Commands::Pair(PairCommand::Test { pair }) => admin::pair_test(config, &pair).await,
        Commands::Config(ConfigCommand::Check) => {
            print_config_summary(&config);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("hoprelay: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc can advance the stats epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reassign_takes_many_pairs() {
        let cli = Cli::try_parse_from([
            "hoprelay", "pair", "reassign", "--to", "beta", "news", "7", "sports",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Pair(PairCommand::Reassign { identity, pairs })) => {
                assert_eq!(identity, "beta");
                assert_eq!(pairs, ["news", "7", "sports"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn identity_kind_is_parsed() {
        let cli = Cli::try_parse_from([
            "hoprelay", "identity", "add", "poster", "--kind", "bot_token",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Identity(IdentityCommand::Add {
                kind: IdentityKind::BotToken,
                ..
            }))
        ));
        assert!(parse_kind("robot").is_err());
    }

    #[test]
    fn default_config_is_valid() {
        let config = hoprelay_config::load_and_validate_str("").unwrap();
        assert_eq!(config.scheduler.group_capacity, 25);
    }
}
