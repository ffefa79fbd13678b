//! `oobx create`

use super::{boot_kernel, print_json, runtime};
use crate::ui;
use oobx_kernel::CreateInvitationRequest;
use oobx_types::config::OobConfig;
use oobx_types::error::OobError;
use oobx_types::invitation::HandshakeProtocol;

pub struct CreateArgs {
    pub label: Option<String>,
    pub endpoint: Option<String>,
    pub handshake: Vec<String>,
    pub public: bool,
    pub multi_use: bool,
    pub alias: Option<String>,
    pub auto_accept: bool,
    pub json: bool,
}

/// Parse `--handshake` values into protocols, keeping order.
fn parse_protocols(values: &[String]) -> Result<Vec<HandshakeProtocol>, OobError> {
    values.iter().map(|v| v.parse()).collect()
}

pub fn cmd_create(config: OobConfig, args: CreateArgs) {
    let handshake_protocols = match parse_protocols(&args.handshake) {
        Ok(p) => p,
        Err(e) => {
            ui::error_with_fix(&e.to_string(), "Use --handshake rfc23 or --handshake rfc160");
            std::process::exit(2);
        }
    };
    let public_disabled = args.public && !config.public_invites;
    let kernel = boot_kernel(config);
    let request = CreateInvitationRequest {
        label: args.label,
        endpoint: args.endpoint,
        auto_accept: args.auto_accept.then_some(true),
        public: args.public,
        handshake_protocols,
        multi_use: args.multi_use,
        alias: args.alias,
        ..Default::default()
    };

    let result = runtime().block_on(kernel.manager().create_invitation(request));
    let record = match result {
        Ok(record) => record,
        Err(e) if public_disabled => {
            ui::error_with_fix(&e.to_string(), "Set `public_invites = true` in config.toml");
            std::process::exit(1);
        }
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    };

    if args.json {
        print_json(&record);
        return;
    }
    ui::success("Invitation created");
    ui::kv("Record", &record.oob_id);
    ui::kv("Invitation", &record.invi_msg_id);
    ui::kv(
        "Protocols",
        &record.invitation.handshake_protocols().join(", "),
    );
    ui::blank();
    println!("{}", record.invitation_url);
    ui::blank();
    ui::hint("keys live only in this process; use the URL for inspection and testing");
}
