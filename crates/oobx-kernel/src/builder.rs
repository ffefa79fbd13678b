//! Invitation creation (sender side).

use crate::collaborators::{
    AttachmentKind, AttachmentRegistry, DidResolver, MediationRouter, Wallet,
};
use crate::records::Records;
use oobx_memory::WriteBatch;
use oobx_types::config::OobConfig;
use oobx_types::connection::{
    AcceptMode, ConnectionRecord, ConnectionState, InvitationMode, TheirRole,
};
use oobx_types::error::{OobError, OobResult};
use oobx_types::invitation::{
    AttachDecorator, HandshakeProtocol, InlineService, Invitation, ServiceEntry,
};
use oobx_types::record::{InvitationRecord, InvitationRecordState, OobRecord};
use oobx_wire::{did_key, DidCommMessage, KeylistUpdate, Responder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection metadata key recording the mediation an invitation was created with.
pub const MEDIATION_METADATA_KEY: &str = "mediation";

/// Reference to an exchange whose message is attached to the invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Options for [`InvitationBuilder::create_invitation`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateInvitationRequest {
    /// Label; the configured default when absent.
    pub label: Option<String>,
    /// Endpoint for pairwise invitations; the configured default when absent.
    pub endpoint: Option<String>,
    /// Accept incoming requests automatically; the configured default when absent.
    pub auto_accept: Option<bool>,
    /// Use the public DID instead of a fresh pairwise key.
    pub public: bool,
    /// Handshake protocols to offer, in preference order.
    pub handshake_protocols: Vec<HandshakeProtocol>,
    pub multi_use: bool,
    /// Alias for the created connection record.
    pub alias: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    /// Metadata written onto the created connection record.
    pub metadata: HashMap<String, Value>,
    pub mediation_id: Option<String>,
}

/// Builds invitations and persists the sender's records.
pub struct InvitationBuilder {
    config: Arc<OobConfig>,
    records: Records,
    wallet: Arc<dyn Wallet>,
    resolver: Arc<dyn DidResolver>,
    attachments: AttachmentRegistry,
    mediation: Arc<dyn MediationRouter>,
    responder: Arc<dyn Responder>,
}

impl InvitationBuilder {
    pub fn new(
        config: Arc<OobConfig>,
        records: Records,
        wallet: Arc<dyn Wallet>,
        resolver: Arc<dyn DidResolver>,
        attachments: AttachmentRegistry,
        mediation: Arc<dyn MediationRouter>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            config,
            records,
            wallet,
            resolver,
            attachments,
            mediation,
            responder,
        }
    }

    /// Create an invitation.
    ///
    /// Every validation failure is reported before anything is persisted.
    pub async fn create_invitation(
        &self,
        request: CreateInvitationRequest,
    ) -> OobResult<InvitationRecord> {
        let kinds = validate(&request)?;
        for kind in &kinds {
            if self.attachments.get(*kind).is_none() {
                return Err(OobError::InvalidInvitation(format!(
                    "No source registered for attachment type: {kind}"
                )));
            }
        }
        let public_did = if request.public {
            if !self.config.public_invites {
                return Err(OobError::InvalidInvitation(
                    "Public invitations are not enabled".into(),
                ));
            }
            Some(self.wallet.public_did().await?.ok_or_else(|| {
                OobError::InvalidInvitation(
                    "Cannot create public invitation with no public DID".into(),
                )
            })?)
        } else {
            None
        };

        let invi_msg_id = Uuid::new_v4().to_string();
        let requests_attach = self
            .resolve_attachments(&request.attachments, &kinds, &invi_msg_id)
            .await?;
        let label = request
            .label
            .clone()
            .unwrap_or_else(|| self.config.default_label.clone());
        let handshake_protocols: Vec<String> = request
            .handshake_protocols
            .iter()
            .map(|p| p.qualified())
            .collect();
        let accept = if request.auto_accept.unwrap_or(self.config.auto_accept_requests) {
            AcceptMode::Auto
        } else {
            AcceptMode::Manual
        };
        let new_connection = |invitation_key: &str| {
            let mut conn = ConnectionRecord::new(ConnectionState::Invitation, TheirRole::Requester);
            conn.invitation_key = Some(invitation_key.to_string());
            conn.invitation_msg_id = Some(invi_msg_id.clone());
            conn.accept = accept;
            conn.alias = request.alias.clone();
            conn.connection_protocol = request.handshake_protocols.first().copied();
            conn
        };

        let (invitation, invitation_url, connection, our_key) = match public_did {
            Some(public) => {
                let invitation = Invitation::new(
                    invi_msg_id.clone(),
                    Some(label),
                    handshake_protocols,
                    requests_attach,
                    vec![ServiceEntry::Did(format!("did:sov:{}", public.did))],
                );
                let endpoint = self.resolver.resolve(&public.did).await?.endpoint;
                let url = invitation.to_url(Some(&endpoint))?;
                let connection = (!request.handshake_protocols.is_empty()).then(|| {
                    let mut conn = new_connection(&public.verkey);
                    conn.invitation = Some(invitation.clone());
                    conn
                });
                (invitation, url, connection, public.verkey)
            }
            None => {
                let verkey = self.wallet.create_signing_key().await?;
                let mut connection = (!request.handshake_protocols.is_empty()).then(|| {
                    let mut conn = new_connection(&verkey);
                    conn.invitation_mode = if request.multi_use {
                        InvitationMode::Multi
                    } else {
                        InvitationMode::Once
                    };
                    conn
                });

                let mut endpoint = request
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| self.config.default_endpoint.clone());
                let mut routing_keys = Vec::new();
                let mut keylist = Some(KeylistUpdate::new().add_key(verkey.clone()));

                if let Some(base) = self.mediation.base_wallet_route().await? {
                    routing_keys = base.routing_keys;
                    endpoint = base.endpoint;
                    // The base mediator forwards to us; the tenant mediator only
                    // needs the base mediator's key.
                    keylist = None;
                }
                if let Some(route) = self.mediation.route(request.mediation_id.as_deref()).await? {
                    routing_keys.extend(route.routing_keys);
                    endpoint = route.endpoint;
                    if let Some(conn) = connection.as_mut() {
                        conn.metadata.insert(
                            MEDIATION_METADATA_KEY.to_string(),
                            json!({ "id": route.mediation_id }),
                        );
                    }
                    if let Some(update) = keylist {
                        debug!(
                            mediation_id = %route.mediation_id,
                            "Registering invitation key with mediator"
                        );
                        self.responder
                            .send_to_connection(
                                &DidCommMessage::KeylistUpdate(update),
                                &route.connection_id,
                            )
                            .await?;
                    }
                }
                let routing_keys = routing_keys
                    .iter()
                    .map(|k| did_key::normalize_routing_key(k))
                    .collect::<Result<Vec<_>, _>>()?;

                let invitation = Invitation::new(
                    invi_msg_id.clone(),
                    Some(label),
                    handshake_protocols,
                    requests_attach,
                    vec![ServiceEntry::Inline(InlineService::did_communication(
                        vec![did_key::verkey_to_did_key(&verkey)?],
                        routing_keys,
                        endpoint,
                    ))],
                );
                let url = invitation.to_url(None)?;
                if let Some(conn) = connection.as_mut() {
                    conn.invitation = Some(invitation.clone());
                    conn.metadata.extend(request.metadata.clone());
                }
                (invitation, url, connection, verkey)
            }
        };

        let record = OobRecord::new_sender(
            invitation.clone(),
            connection.as_ref().map(|c| c.connection_id.clone()),
            Some(our_key),
        );
        let mut batch = WriteBatch::new();
        if let Some(conn) = connection {
            batch = batch.save_connection(conn);
        }
        self.records.commit(batch.save_oob(record.clone())).await?;
        info!(
            oob_id = %record.oob_id,
            invi_msg_id = %invi_msg_id,
            public = request.public,
            connection_id = ?record.connection_id,
            "Created invitation"
        );

        Ok(InvitationRecord {
            oob_id: record.oob_id,
            state: InvitationRecordState::Initial,
            invi_msg_id,
            invitation,
            invitation_url,
        })
    }

    async fn resolve_attachments(
        &self,
        refs: &[AttachmentRef],
        kinds: &[AttachmentKind],
        invi_msg_id: &str,
    ) -> OobResult<Vec<AttachDecorator>> {
        let lookups = refs.iter().zip(kinds).enumerate().map(|(index, (reference, kind))| {
            let source = self.attachments.get(*kind);
            async move {
                let source = source.ok_or_else(|| {
                    OobError::InvalidInvitation(format!(
                        "No source registered for attachment type: {kind}"
                    ))
                })?;
                let message = source.fetch(&reference.id).await?;
                Ok::<_, OobError>(AttachDecorator::wrap_json(
                    format!("request-{index}"),
                    with_parent_thread(message, invi_msg_id)?,
                ))
            }
        });
        futures::future::try_join_all(lookups).await
    }
}

/// Check option combinations; returns the parsed attachment kinds.
fn validate(request: &CreateInvitationRequest) -> OobResult<Vec<AttachmentKind>> {
    let invalid = |msg: &str| -> OobResult<Vec<AttachmentKind>> {
        Err(OobError::InvalidInvitation(msg.to_string()))
    };
    if request.handshake_protocols.is_empty() && request.attachments.is_empty() {
        return invalid("Invitation must include handshake protocols, attachments, or both");
    }
    if request.public && request.multi_use {
        return invalid("Cannot create public invitation with multi_use");
    }
    if request.public && !request.metadata.is_empty() {
        return invalid("Cannot store metadata on public invitations");
    }
    if !request.attachments.is_empty() && request.multi_use {
        return invalid("Cannot create multi use invitation with attachments");
    }
    request
        .attachments
        .iter()
        .map(|a| a.kind.parse::<AttachmentKind>())
        .collect()
}

/// Set `~thread.pthid` on an attached message, keeping any other thread fields.
fn with_parent_thread(mut message: Value, invi_msg_id: &str) -> OobResult<Value> {
    let object = message.as_object_mut().ok_or_else(|| {
        OobError::MalformedAttachment("attached message is not a JSON object".into())
    })?;
    let thread = object
        .entry("~thread")
        .or_insert_with(|| Value::Object(Default::default()));
    match thread.as_object_mut() {
        Some(fields) => {
            fields.insert("pthid".into(), Value::String(invi_msg_id.to_string()));
        }
        None => *thread = json!({ "pthid": invi_msg_id }),
    }
    Ok(message)
}
