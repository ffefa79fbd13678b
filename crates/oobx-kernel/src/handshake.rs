//! Handshake negotiation.
//!
//! Picks the first handshake protocol, in invitation order, that this agent
//! supports and has a capability for, and delegates connection
//! establishment to that capability.

use crate::collaborators::DidResolver;
use crate::records::Records;
use async_trait::async_trait;
use dashmap::DashMap;
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::{OobError, OobResult};
use oobx_types::invitation::{HandshakeProtocol, InlineService, Invitation, ServiceEntry};
use oobx_types::record::OobRecord;
use oobx_wire::did_key;
use oobx_wire::ConnectionInvitation;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The invitation handed to a capability, in the form its protocol expects.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeInvitation {
    /// The out-of-band invitation itself (DID exchange).
    OutOfBand(Invitation),
    /// A legacy connection invitation with explicit keys.
    Legacy(ConnectionInvitation),
}

/// Everything a capability needs to establish a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub invitation: HandshakeInvitation,
    /// The inviter's public DID when the service was a DID reference.
    pub their_public_did: Option<String>,
    pub auto_accept: Option<bool>,
    pub alias: Option<String>,
    pub mediation_id: Option<String>,
}

/// Establishes a connection for one handshake protocol.
#[async_trait]
pub trait HandshakeCapability: Send + Sync + 'static {
    async fn establish(&self, request: HandshakeRequest) -> OobResult<ConnectionRecord>;
}

/// Capabilities keyed by protocol, populated at startup.
#[derive(Default, Clone)]
pub struct HandshakeRegistry {
    capabilities: Arc<DashMap<HandshakeProtocol, Arc<dyn HandshakeCapability>>>,
}

impl HandshakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the capability for `protocol`.
    pub fn register(&self, protocol: HandshakeProtocol, capability: Arc<dyn HandshakeCapability>) {
        self.capabilities.insert(protocol, capability);
    }

    pub fn get(&self, protocol: HandshakeProtocol) -> Option<Arc<dyn HandshakeCapability>> {
        self.capabilities.get(&protocol).map(|c| Arc::clone(c.value()))
    }
}

/// Caller-supplied handshake options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandshakeOptions {
    pub auto_accept: Option<bool>,
    pub alias: Option<String>,
    pub mediation_id: Option<String>,
}

/// Selects a protocol and runs the handshake.
pub struct HandshakeNegotiator {
    registry: HandshakeRegistry,
    resolver: Arc<dyn DidResolver>,
    records: Records,
    supported: Vec<HandshakeProtocol>,
}

impl HandshakeNegotiator {
    pub fn new(
        registry: HandshakeRegistry,
        resolver: Arc<dyn DidResolver>,
        records: Records,
        supported: Vec<HandshakeProtocol>,
    ) -> Self {
        Self {
            registry,
            resolver,
            records,
            supported,
        }
    }

    /// The protocol that would be used for `invitation`.
    pub fn select(&self, invitation: &Invitation) -> Option<HandshakeProtocol> {
        invitation
            .known_handshake_protocols()
            .into_iter()
            .find(|p| self.supported.contains(p) && self.registry.get(*p).is_some())
    }

    /// Establish a connection for `record`'s invitation and bind it.
    ///
    /// On failure the record is left untouched.
    pub async fn perform(
        &self,
        record: &mut OobRecord,
        options: &HandshakeOptions,
    ) -> OobResult<ConnectionRecord> {
        let invitation = &record.invitation;
        let attempted = invitation.handshake_protocols().to_vec();
        let failed = |reason: String| OobError::HandshakeFailed {
            protocols: attempted.clone(),
            reason,
        };

        let protocol = self.select(invitation).ok_or_else(|| {
            failed(format!(
                "none of the listed protocols is supported (supported: {})",
                self.supported
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        let capability = self
            .registry
            .get(protocol)
            .ok_or_else(|| failed(format!("no capability registered for {protocol}")))?;

        let service = invitation
            .services()
            .first()
            .ok_or_else(|| OobError::InvalidInvitation("invitation has no service".into()))?;
        let their_public_did = service.public_did().map(str::to_string);

        let handshake_invitation = if protocol.requires_explicit_keys() {
            let inline = match service {
                ServiceEntry::Did(did) => self
                    .resolve_inline(did)
                    .await
                    .map_err(|e| failed(e.to_string()))?,
                ServiceEntry::Inline(svc) => svc.clone(),
            };
            HandshakeInvitation::Legacy(
                legacy_invitation(invitation, &inline).map_err(|e| failed(e.to_string()))?,
            )
        } else {
            HandshakeInvitation::OutOfBand(invitation.clone())
        };

        debug!(
            oob_id = %record.oob_id,
            protocol = %protocol,
            their_public_did = ?their_public_did,
            "Performing handshake"
        );
        let request = HandshakeRequest {
            invitation: handshake_invitation,
            their_public_did,
            auto_accept: options.auto_accept,
            alias: options.alias.clone(),
            mediation_id: options.mediation_id.clone(),
        };
        let connection = match capability.establish(request).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(oob_id = %record.oob_id, protocol = %protocol, error = %e, "Handshake failed");
                return Err(failed(e.to_string()));
            }
        };

        record.connection_id = Some(connection.connection_id.clone());
        self.records.save_oob(record).await?;
        info!(
            oob_id = %record.oob_id,
            connection_id = %connection.connection_id,
            protocol = %protocol,
            "Handshake started"
        );
        Ok(connection)
    }

    /// Turn a DID reference into an inline service with `did:key` keys.
    async fn resolve_inline(&self, did: &str) -> OobResult<InlineService> {
        let resolved = self.resolver.resolve(did).await?;
        let recipient_keys = resolved
            .recipient_keys
            .iter()
            .map(|k| did_key::verkey_to_did_key(k))
            .collect::<Result<Vec<_>, _>>()?;
        let routing_keys = resolved
            .routing_keys
            .iter()
            .map(|k| did_key::verkey_to_did_key(k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InlineService::did_communication(
            recipient_keys,
            routing_keys,
            resolved.endpoint,
        ))
    }
}

/// Build the legacy invitation: same id and label, base58 keys.
fn legacy_invitation(
    invitation: &Invitation,
    service: &InlineService,
) -> OobResult<ConnectionInvitation> {
    let recipient_keys = service
        .recipient_keys
        .iter()
        .map(|k| did_key::to_verkey(k))
        .collect::<Result<Vec<_>, _>>()?;
    let routing_keys = service
        .routing_keys
        .iter()
        .map(|k| did_key::to_verkey(k))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConnectionInvitation::new(
        invitation.id(),
        invitation.label().map(str::to_string),
        recipient_keys,
        service.service_endpoint.clone(),
        routing_keys,
    ))
}
