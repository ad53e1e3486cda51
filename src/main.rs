//! CLI entry point for the magnet-relay maintenance tool.

use anyhow::{Context, Result};
use clap::Parser;
use magnet_relay::config::VerbositySetting;
use magnet_relay::load_settings;
use tracing::debug;

mod cli;
mod commands;

use cli::{
    Args, Command, ConfigCommand, LedgerCommand, ManifestCommand, QuotaCommand, SlotsCommand,
};

/// Log level when `RUST_LOG` is unset.
///
/// Priority: quiet flag > verbose flag > config file verbosity > info.
fn default_level(args: &Args, configured: Option<VerbositySetting>) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => {}
        1 => return "debug",
        _ => return "trace",
    }
    match configured {
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Verbose) => "debug",
        Some(VerbositySetting::Debug) => "trace",
        Some(VerbositySetting::Default) | None => "info",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = load_settings(args.config.as_deref()).context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(default_level(&args, loaded.settings.verbosity))
    });
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();

    debug!(?args, "CLI arguments parsed");

    let mut settings = loaded.settings.clone();
    if let Some(db) = &args.db {
        settings.database_path.clone_from(db);
    }

    match &args.command {
        Command::Locator { text } => commands::run_locator_command(text),
        Command::Quota {
            action: QuotaCommand::Show { identity, json },
        } => commands::run_quota_show_command(&settings, *identity, *json).await,
        Command::Quota {
            action: QuotaCommand::SetTier { identity, tier },
        } => commands::run_quota_set_tier_command(&settings, *identity, *tier).await,
        Command::Slots {
            action: SlotsCommand::Reset,
        } => commands::run_slots_reset_command(&settings).await,
        Command::Manifest {
            action: ManifestCommand::Show { target, json },
        } => commands::run_manifest_show_command(&settings, target, *json).await,
        Command::Ledger {
            action: LedgerCommand::Clear,
        } => commands::run_ledger_clear_command(&settings).await,
        Command::Config {
            action: ConfigCommand::Show,
        } => commands::run_config_show_command(&loaded, &settings),
    }
}
