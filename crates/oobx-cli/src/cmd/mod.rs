//! Command implementations.

pub mod create;
pub mod decode;
pub mod records;

use crate::ui;
use oobx_kernel::collaborators::{AttachmentRegistry, NoMediation, ResolvedService, StaticResolver};
use oobx_kernel::handshake::HandshakeRegistry;
use oobx_kernel::offline::{InvitationTargets, LoggingProcessor, LoggingResponder};
use oobx_kernel::wallet::LocalWallet;
use oobx_kernel::{Collaborators, OobKernel};
use oobx_types::config::OobConfig;
use std::sync::Arc;

/// Collaborators for a process with no transport. The wallet gets a
/// throwaway public DID served at the configured endpoint.
fn offline_collaborators(config: &OobConfig) -> Collaborators {
    let wallet = Arc::new(LocalWallet::new());
    let resolver = Arc::new(StaticResolver::new());
    match wallet.create_public_did() {
        Ok(public) => resolver.insert(
            public.did,
            ResolvedService {
                endpoint: config.default_endpoint.clone(),
                recipient_keys: vec![public.verkey],
                routing_keys: vec![],
            },
        ),
        Err(e) => tracing::warn!(error = %e, "No public DID for this session"),
    }
    Collaborators {
        wallet,
        resolver,
        responder: Arc::new(LoggingResponder),
        targets: Arc::new(InvitationTargets),
        mediation: Arc::new(NoMediation),
        processor: Arc::new(LoggingProcessor),
        attachments: AttachmentRegistry::new(),
        handshakes: HandshakeRegistry::new(),
    }
}

pub(crate) fn boot_kernel(config: OobConfig) -> OobKernel {
    let collaborators = offline_collaborators(&config);
    match OobKernel::boot_with_config(config, collaborators) {
        Ok(kernel) => kernel,
        Err(e) => {
            ui::error_with_fix(
                &format!("Failed to open the record store: {e}"),
                "Check `database_path` in config.toml or set OOBX_HOME",
            );
            std::process::exit(1);
        }
    }
}

pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            ui::error(&format!("Failed to serialize output: {e}"));
            std::process::exit(1);
        }
    }
}
