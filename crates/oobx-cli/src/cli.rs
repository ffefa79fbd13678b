//! Clap CLI definitions for oobx.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  oobx create --handshake rfc23          Pairwise invitation offering DID exchange
  oobx create --public --handshake rfc160
  oobx decode 'http://host:8020?oob=eyJ...'
  oobx records --json                    Dump stored exchanges as JSON
  oobx show <oob-id>                     One exchange in detail
  oobx prune <invitation-id>             Drop unused single-use connections";

/// oobx: out-of-band invitations for DIDComm agents.
#[derive(Parser)]
#[command(name = "oobx", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an invitation and store the sender's records.
    Create {
        /// Label shown to the invitee (default: config `default_label`).
        #[arg(long)]
        label: Option<String>,
        /// Endpoint for pairwise invitations (default: config `default_endpoint`).
        #[arg(long)]
        endpoint: Option<String>,
        /// Handshake protocol to offer (rfc23, rfc160). Repeat in preference order.
        #[arg(long = "handshake")]
        handshake: Vec<String>,
        /// Use the public DID instead of a fresh key.
        #[arg(long)]
        public: bool,
        /// Allow the invitation to be used more than once.
        #[arg(long)]
        multi_use: bool,
        /// Alias for the created connection.
        #[arg(long)]
        alias: Option<String>,
        /// Accept incoming requests automatically.
        #[arg(long)]
        auto_accept: bool,
        /// Print the invitation record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Decode an invitation URL and print the invitation.
    Decode {
        /// Invitation URL (`oob=` or `c_i=` query parameter).
        url: String,
        /// Print raw JSON.
        #[arg(long)]
        json: bool,
    },
    /// List stored out-of-band records.
    Records {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show one out-of-band record.
    Show {
        /// Record id.
        oob_id: String,
    },
    /// Delete single-use connections for an invitation that were never used.
    Prune {
        /// Invitation message id.
        invitation_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_collects_repeated_handshakes() {
        let cli = Cli::parse_from([
            "oobx",
            "create",
            "--handshake",
            "rfc160",
            "--handshake",
            "rfc23",
            "--multi-use",
        ]);
        match cli.command {
            Commands::Create {
                handshake,
                multi_use,
                public,
                ..
            } => {
                assert_eq!(handshake, vec!["rfc160", "rfc23"]);
                assert!(multi_use);
                assert!(!public);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn global_config_flag() {
        let cli = Cli::parse_from(["oobx", "records", "--config", "/tmp/oobx.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/oobx.toml")));
        assert!(matches!(cli.command, Commands::Records { json: false }));
    }
}
