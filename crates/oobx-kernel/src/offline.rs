//! Collaborators for running without a transport.
//!
//! Outbound messages are logged instead of sent and attached requests are
//! logged instead of processed. Used by the CLI against a local database.

use crate::collaborators::MessageProcessor;
use async_trait::async_trait;
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::OobResult;
use oobx_types::invitation::ServiceEntry;
use oobx_types::record::OobRecord;
use oobx_wire::{did_key, ConnectionTarget, ConnectionTargets, DidCommMessage, Responder};
use tracing::{info, warn};

/// Logs every outbound message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingResponder;

#[async_trait]
impl Responder for LoggingResponder {
    async fn send(&self, message: &DidCommMessage, targets: &[ConnectionTarget]) -> OobResult<()> {
        let endpoints: Vec<&str> = targets.iter().map(|t| t.endpoint.as_str()).collect();
        info!(
            msg_type = message.type_name(),
            msg_id = message.id(),
            ?endpoints,
            "Outbound message (not delivered)"
        );
        Ok(())
    }

    async fn send_to_connection(
        &self,
        message: &DidCommMessage,
        connection_id: &str,
    ) -> OobResult<()> {
        info!(
            msg_type = message.type_name(),
            msg_id = message.id(),
            connection_id,
            "Outbound message (not delivered)"
        );
        Ok(())
    }
}

/// Derives a target from the inline service of the connection's invitation.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvitationTargets;

#[async_trait]
impl ConnectionTargets for InvitationTargets {
    async fn fetch(&self, connection: &ConnectionRecord) -> OobResult<Vec<ConnectionTarget>> {
        let service = connection
            .invitation
            .as_ref()
            .and_then(|inv| inv.services().first());
        let Some(ServiceEntry::Inline(svc)) = service else {
            warn!(
                connection_id = %connection.connection_id,
                "No inline service on connection, no delivery targets"
            );
            return Ok(Vec::new());
        };
        let recipient_keys = svc
            .recipient_keys
            .iter()
            .map(|k| did_key::to_verkey(k))
            .collect::<Result<Vec<_>, _>>()?;
        let routing_keys = svc
            .routing_keys
            .iter()
            .map(|k| did_key::to_verkey(k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(vec![ConnectionTarget {
            did: connection.their_public_did.clone(),
            endpoint: svc.service_endpoint.clone(),
            label: connection.their_label.clone(),
            recipient_keys,
            routing_keys,
            sender_key: connection.invitation_key.clone(),
        }])
    }
}

/// Logs attached requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn handle_message(&self, content: serde_json::Value, record: OobRecord) -> OobResult<()> {
        let msg_type = content.get("@type").and_then(|t| t.as_str()).unwrap_or("");
        info!(
            oob_id = %record.oob_id,
            msg_type,
            "Attached request received (not processed)"
        );
        Ok(())
    }
}
