//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use magnet_relay::Tier;

/// Maintenance tool for the magnet relay database.
///
/// Inspects and repairs quota profiles, cached manifests and publish
/// records shared with the running relay.
#[derive(Parser, Debug)]
#[command(name = "magnet-relay")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to load instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding `database_path` from the config
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a magnet locator and print its resource id
    Locator {
        /// Text containing the locator (an optional /magnet prefix is accepted)
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Inspect or change quota profiles
    Quota {
        #[command(subcommand)]
        action: QuotaCommand,
    },

    /// Concurrency slot maintenance
    Slots {
        #[command(subcommand)]
        action: SlotsCommand,
    },

    /// Inspect cached manifests
    Manifest {
        #[command(subcommand)]
        action: ManifestCommand,
    },

    /// Publish ledger maintenance
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
    },

    /// Show effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum QuotaCommand {
    /// Print a profile, creating it with basic limits if absent
    Show {
        identity: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a profile onto another tier
    SetTier { identity: i64, tier: Tier },
}

#[derive(Subcommand, Debug)]
pub enum SlotsCommand {
    /// Restore every profile's concurrency slots (run after a crash)
    Reset,
}

#[derive(Subcommand, Debug)]
pub enum ManifestCommand {
    /// Print a cached manifest by resource id or locator
    Show {
        target: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Delete every announcement and comment record
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print effective settings and their source
    Show,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Args::try_parse_from(["magnet-relay"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["magnet-relay", "slots", "reset", "-vv", "--db", "x.db"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.db, Some(PathBuf::from("x.db")));
        assert!(matches!(
            args.command,
            Command::Slots {
                action: SlotsCommand::Reset
            }
        ));
    }

    #[test]
    fn test_cli_quiet_and_config() {
        let args =
            Args::try_parse_from(["magnet-relay", "-q", "--config", "c.toml", "config", "show"])
                .unwrap();
        assert!(args.quiet);
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn test_cli_quota_show_json() {
        let args = Args::try_parse_from(["magnet-relay", "quota", "show", "42", "--json"]).unwrap();
        match args.command {
            Command::Quota {
                action: QuotaCommand::Show { identity, json },
            } => {
                assert_eq!(identity, 42);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_set_tier_parses_tier() {
        let args =
            Args::try_parse_from(["magnet-relay", "quota", "set-tier", "7", "premium"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Quota {
                action: QuotaCommand::SetTier {
                    identity: 7,
                    tier: Tier::Premium
                }
            }
        ));
    }

    #[test]
    fn test_cli_set_tier_rejects_unknown_tier() {
        let err = Args::try_parse_from(["magnet-relay", "quota", "set-tier", "7", "gold"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_locator_collects_words() {
        let args = Args::try_parse_from([
            "magnet-relay",
            "locator",
            "/magnet",
            "magnet:?xt=urn:btih:abc",
        ])
        .unwrap();
        match args.command {
            Command::Locator { text } => assert_eq!(text.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_unknown_subcommand_rejected() {
        let err = Args::try_parse_from(["magnet-relay", "download"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }
}
