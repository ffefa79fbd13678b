//! oobx CLI: create and decode out-of-band invitations, inspect stored records.

mod cli;
mod cmd;
mod table;
mod ui;

use clap::Parser;
use cli::{Cli, Commands};
use cmd::create::CreateArgs;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = oobx_kernel::config::load_config(cli.config.as_deref());
    init_tracing_stderr(&config.log_level);

    match cli.command {
        Commands::Create {
            label,
            endpoint,
            handshake,
            public,
            multi_use,
            alias,
            auto_accept,
            json,
        } => cmd::create::cmd_create(
            config,
            CreateArgs {
                label,
                endpoint,
                handshake,
                public,
                multi_use,
                alias,
                auto_accept,
                json,
            },
        ),
        Commands::Decode { url, json } => cmd::decode::cmd_decode(&url, json),
        Commands::Records { json } => cmd::records::cmd_records(config, json),
        Commands::Show { oob_id } => cmd::records::cmd_show(config, &oob_id),
        Commands::Prune { invitation_id } => cmd::records::cmd_prune(config, &invitation_id),
    }
}
