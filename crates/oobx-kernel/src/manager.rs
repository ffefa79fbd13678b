//! The out-of-band manager: invitation creation, receipt, and inbound
//! reuse messages.

use crate::builder::{CreateInvitationRequest, InvitationBuilder};
use crate::collaborators::{
    AttachmentRegistry, DidResolver, MediationRouter, MessageProcessor, Wallet,
};
use crate::event_bus::EventBus;
use crate::handshake::{HandshakeNegotiator, HandshakeOptions, HandshakeRegistry};
use crate::records::Records;
use crate::reuse::ReuseProtocol;
use crate::waiter;
use oobx_types::config::{OobConfig, ReuseFallback};
use oobx_types::connection::{ConnectionRecord, ConnectionState};
use oobx_types::error::{OobError, OobResult};
use oobx_types::invitation::Invitation;
use oobx_types::record::{InvitationRecord, OobRecord, OobRole, OobState};
use oobx_wire::{ConnectionTargets, DidCommMessage, Responder};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything the manager delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub wallet: Arc<dyn Wallet>,
    pub resolver: Arc<dyn DidResolver>,
    pub responder: Arc<dyn Responder>,
    pub targets: Arc<dyn ConnectionTargets>,
    pub mediation: Arc<dyn MediationRouter>,
    pub processor: Arc<dyn MessageProcessor>,
    pub attachments: AttachmentRegistry,
    pub handshakes: HandshakeRegistry,
}

/// Options for [`OutOfBandManager::receive_invitation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveOptions {
    /// Try to reuse an existing connection with the inviter's public DID.
    pub use_existing_connection: bool,
    pub auto_accept: Option<bool>,
    pub alias: Option<String>,
    pub mediation_id: Option<String>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            use_existing_connection: true,
            auto_accept: None,
            alias: None,
            mediation_id: None,
        }
    }
}

/// Entry point for out-of-band exchanges.
pub struct OutOfBandManager {
    config: Arc<OobConfig>,
    records: Records,
    builder: InvitationBuilder,
    negotiator: HandshakeNegotiator,
    reuse: ReuseProtocol,
    wallet: Arc<dyn Wallet>,
    mediation: Arc<dyn MediationRouter>,
    processor: Arc<dyn MessageProcessor>,
}

impl OutOfBandManager {
    pub fn new(config: OobConfig, records: Records, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let builder = InvitationBuilder::new(
            Arc::clone(&config),
            records.clone(),
            Arc::clone(&collaborators.wallet),
            Arc::clone(&collaborators.resolver),
            collaborators.attachments.clone(),
            Arc::clone(&collaborators.mediation),
            Arc::clone(&collaborators.responder),
        );
        let negotiator = HandshakeNegotiator::new(
            collaborators.handshakes.clone(),
            Arc::clone(&collaborators.resolver),
            records.clone(),
            config.supported_handshake_protocols.clone(),
        );
        let reuse = ReuseProtocol::new(
            records.clone(),
            Arc::clone(&collaborators.responder),
            Arc::clone(&collaborators.targets),
            config.reuse_timeout(),
            config.reuse_policy,
        );
        Self {
            config,
            records,
            builder,
            negotiator,
            reuse,
            wallet: collaborators.wallet,
            mediation: collaborators.mediation,
            processor: collaborators.processor,
        }
    }

    pub fn config(&self) -> &OobConfig {
        &self.config
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// The bus record and reuse events are published on.
    pub fn bus(&self) -> &Arc<EventBus> {
        self.records.bus()
    }

    /// Create an invitation and persist the sender's records.
    pub async fn create_invitation(
        &self,
        request: CreateInvitationRequest,
    ) -> OobResult<InvitationRecord> {
        self.builder.create_invitation(request).await
    }

    /// Receive an invitation: reuse an existing connection, run a handshake,
    /// and dispatch the first attached request, as the invitation requires.
    ///
    /// Returns the receiver's record: `Accepted` when an existing connection
    /// was reused, `Done` otherwise.
    pub async fn receive_invitation(
        &self,
        invitation: Invitation,
        options: ReceiveOptions,
    ) -> OobResult<OobRecord> {
        invitation.validate_for_receipt()?;
        let mediation_id = self.known_mediation(options.mediation_id).await?;
        let public_did = invitation
            .services()
            .first()
            .and_then(|s| s.public_did())
            .map(str::to_string);

        let mut connection = match (&public_did, options.use_existing_connection) {
            (Some(did), true) => self.records.find_existing_connection(did)?,
            _ => None,
        };
        if let Some(conn) = &connection {
            debug!(
                connection_id = %conn.connection_id,
                their_public_did = ?public_did,
                "Found existing connection for invitation"
            );
        }

        let mut record = OobRecord::new_receiver(
            invitation,
            connection.as_ref().map(|c| c.connection_id.clone()),
        );
        self.records.save_oob(&mut record).await?;
        info!(
            oob_id = %record.oob_id,
            invi_msg_id = %record.invi_msg_id,
            "Received invitation"
        );

        let has_attachments = !record.invitation.requests_attach().is_empty();
        if !has_attachments {
            if let Some(existing) = connection.take() {
                let outcome = self.reuse.initiate(&mut record, &existing).await?;
                if outcome == OobState::Accepted {
                    info!(
                        oob_id = %record.oob_id,
                        connection_id = %existing.connection_id,
                        "Connection {} is being reused for invitation {}",
                        existing.connection_id,
                        record.invi_msg_id
                    );
                    return Ok(record);
                }
                if self.config.reuse_fallback == ReuseFallback::Fail {
                    return Err(OobError::ReuseRejected {
                        invitation_id: record.invi_msg_id.clone(),
                        connection_id: existing.connection_id,
                    });
                }
                debug!(oob_id = %record.oob_id, "Reuse not accepted, falling back to handshake");
            }
        }

        if connection.is_none() && !record.invitation.handshake_protocols().is_empty() {
            let handshake = HandshakeOptions {
                auto_accept: options.auto_accept,
                alias: options.alias.clone(),
                mediation_id: mediation_id.clone(),
            };
            let established = self.negotiator.perform(&mut record, &handshake).await?;
            connection = Some(self.records.retrieve_connection(&established.connection_id)?);
        }

        if let Some(attachment) = record.invitation.requests_attach().first() {
            let content = attachment.content()?;
            match &connection {
                Some(conn) => self.wait_for_connection(conn).await?,
                None => {
                    let key = self.wallet.create_signing_key().await?;
                    debug!(oob_id = %record.oob_id, "Connectionless exchange, created recipient key");
                    record.our_recipient_key = Some(key);
                    self.records.save_oob(&mut record).await?;
                }
            }
            self.dispatch(content, record.clone());
        }

        record.state = OobState::Done;
        self.records.save_oob(&mut record).await?;
        info!(
            oob_id = %record.oob_id,
            connection_id = ?record.connection_id,
            "Invitation processed"
        );
        Ok(record)
    }

    /// Decode and handle a DIDComm message that arrived on `connection_id`.
    ///
    /// Messages without a handler here are logged and ignored.
    pub async fn handle_inbound(&self, body: &[u8], connection_id: &str) -> OobResult<()> {
        let message = DidCommMessage::decode(body)?;
        debug!(msg_type = message.type_name(), connection_id, "Inbound message");
        match message {
            DidCommMessage::HandshakeReuse(reuse) => {
                self.reuse.receive_reuse(&reuse, connection_id).await
            }
            DidCommMessage::HandshakeReuseAccept(accept) => {
                self.reuse.receive_reuse_accept(&accept, connection_id).await
            }
            DidCommMessage::ProblemReport(report) => {
                self.reuse.receive_problem_report(&report).await
            }
            other => {
                warn!(
                    msg_type = other.type_name(),
                    connection_id,
                    "No out-of-band handler for message, ignoring"
                );
                Ok(())
            }
        }
    }

    /// Delete single-use connections for `invi_msg_id` that never left the
    /// invitation state. Returns how many were removed.
    pub fn delete_stale_connection_by_invitation(&self, invi_msg_id: &str) -> OobResult<usize> {
        let removed = self.records.delete_stale_connections(invi_msg_id)?;
        if removed > 0 {
            info!(invi_msg_id, removed, "Deleted stale connections");
        }
        Ok(removed)
    }

    pub fn get_record(&self, oob_id: &str) -> OobResult<Option<OobRecord>> {
        self.records.get_oob(oob_id)
    }

    pub fn list_records(&self) -> OobResult<Vec<OobRecord>> {
        self.records.list_oob()
    }

    /// The record for `invi_msg_id` in any of `states` (any state when empty).
    pub fn find_record_by_invitation(
        &self,
        invi_msg_id: &str,
        role: Option<OobRole>,
        states: &[OobState],
    ) -> OobResult<Option<OobRecord>> {
        self.records.find_oob_by_invitation(invi_msg_id, role, states)
    }

    /// The record correlated by `(invi_msg_id, reuse_msg_id)`.
    pub fn find_record_by_reuse(
        &self,
        invi_msg_id: &str,
        reuse_msg_id: &str,
    ) -> OobResult<Option<OobRecord>> {
        self.records.find_oob_by_reuse(invi_msg_id, reuse_msg_id)
    }

    async fn known_mediation(&self, mediation_id: Option<String>) -> OobResult<Option<String>> {
        match mediation_id {
            Some(id) if self.mediation.is_known(&id).await? => Ok(Some(id)),
            Some(id) => {
                warn!(mediation_id = %id, "Unknown mediation id, continuing without mediation");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Wait for `conn` to be able to carry the attached request.
    ///
    /// A timeout is logged and the exchange proceeds.
    async fn wait_for_connection(&self, conn: &ConnectionRecord) -> OobResult<()> {
        let records = &self.records;
        let connection_id = conn.connection_id.as_str();
        let waited = waiter::wait_for(
            self.bus(),
            connection_id,
            self.config.connection_ready_timeout(),
            move || async move { records.retrieve_connection(connection_id) },
            |c: &ConnectionRecord| c.is_ready() || c.state == ConnectionState::Response,
        )
        .await?;
        if waited.is_satisfied() {
            debug!(connection_id, "Connection ready");
        } else {
            warn!(
                connection_id,
                timeout_secs = self.config.connection_ready_timeout_secs,
                "Connection not ready before timeout, proceeding"
            );
        }
        Ok(())
    }

    fn dispatch(&self, content: serde_json::Value, record: OobRecord) {
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move {
            let oob_id = record.oob_id.clone();
            if let Err(e) = processor.handle_message(content, record).await {
                error!(oob_id = %oob_id, error = %e, "Attached request processing failed");
            }
        });
    }
}
