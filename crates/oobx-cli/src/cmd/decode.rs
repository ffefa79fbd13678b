//! `oobx decode`

use super::print_json;
use crate::ui;
use oobx_types::invitation::{Invitation, ServiceEntry};

pub fn cmd_decode(url: &str, json: bool) {
    let invitation = match Invitation::from_url(url) {
        Ok(inv) => inv,
        Err(e) => {
            ui::error_with_fix(&e.to_string(), "Pass the full URL including `?oob=`");
            std::process::exit(1);
        }
    };
    if json {
        print_json(&invitation);
        return;
    }

    ui::section("Invitation");
    ui::kv("Id", invitation.id());
    ui::kv("Label", invitation.label().unwrap_or("-"));
    ui::kv("Type", invitation.msg_type());
    if invitation.handshake_protocols().is_empty() {
        ui::kv_warn("Protocols", "none (connectionless)");
    } else {
        ui::kv("Protocols", &invitation.handshake_protocols().join(", "));
    }
    ui::kv(
        "Attachments",
        &invitation.requests_attach().len().to_string(),
    );
    for service in invitation.services() {
        match service {
            ServiceEntry::Did(did) => ui::kv("Service", did),
            ServiceEntry::Inline(svc) => {
                ui::kv("Service", &svc.service_endpoint);
                for key in &svc.recipient_keys {
                    ui::kv("  Recipient", key);
                }
                for key in &svc.routing_keys {
                    ui::kv("  Routing", key);
                }
            }
        }
    }
    match invitation.validate_for_receipt() {
        Ok(()) => ui::kv_ok("Valid", "yes"),
        Err(e) => ui::kv_warn("Valid", &e.to_string()),
    }
}
