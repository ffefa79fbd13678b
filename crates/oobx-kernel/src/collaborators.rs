//! Collaborator seams: everything the engine delegates.
//!
//! Key management, DID resolution, attachment lookup, mediation routing, and
//! processing of attached messages are owned elsewhere. The engine talks to
//! them only through these traits.

use async_trait::async_trait;
use dashmap::DashMap;
use oobx_types::error::{OobError, OobResult};
use oobx_types::record::OobRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A public DID and its verkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDid {
    /// Unqualified DID.
    pub did: String,
    /// Base58 Ed25519 verkey.
    pub verkey: String,
}

/// Key management.
#[async_trait]
pub trait Wallet: Send + Sync + 'static {
    /// Create a fresh Ed25519 signing key, returning its base58 verkey.
    async fn create_signing_key(&self) -> OobResult<String>;

    /// The agent's public DID, if one is configured.
    async fn public_did(&self) -> OobResult<Option<PublicDid>>;
}

/// Keys and endpoint behind a DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedService {
    pub endpoint: String,
    /// Base58 verkeys.
    pub recipient_keys: Vec<String>,
    /// Base58 verkeys.
    pub routing_keys: Vec<String>,
}

/// DID resolution.
#[async_trait]
pub trait DidResolver: Send + Sync + 'static {
    /// Resolve a (qualified or unqualified) DID to its DIDComm service.
    async fn resolve(&self, did: &str) -> OobResult<ResolvedService>;
}

/// An in-memory resolver over registered DIDs.
#[derive(Default)]
pub struct StaticResolver {
    entries: DashMap<String, ResolvedService>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the service for an unqualified DID.
    pub fn insert(&self, did: impl Into<String>, service: ResolvedService) {
        self.entries.insert(did.into(), service);
    }
}

#[async_trait]
impl DidResolver for StaticResolver {
    async fn resolve(&self, did: &str) -> OobResult<ResolvedService> {
        let bare = did.rsplit(':').next().unwrap_or(did);
        self.entries
            .get(bare)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OobError::Resolution(format!("DID {did} is not resolvable")))
    }
}

/// Kinds of application messages that may be attached to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    /// A credential offer (`credential-offer`).
    CredentialOffer,
    /// A presentation request (`present-proof`).
    PresentProof,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::CredentialOffer => "credential-offer",
            AttachmentKind::PresentProof => "present-proof",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentKind {
    type Err = OobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credential-offer" => Ok(AttachmentKind::CredentialOffer),
            "present-proof" => Ok(AttachmentKind::PresentProof),
            other => Err(OobError::InvalidInvitation(format!(
                "Unknown attachment type: {other}"
            ))),
        }
    }
}

/// Looks up an exchange by id and returns the message to attach.
#[async_trait]
pub trait AttachmentSource: Send + Sync + 'static {
    async fn fetch(&self, id: &str) -> OobResult<serde_json::Value>;
}

/// Attachment sources keyed by kind, populated at startup.
#[derive(Default, Clone)]
pub struct AttachmentRegistry {
    sources: Arc<DashMap<AttachmentKind, Arc<dyn AttachmentSource>>>,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the source for `kind`.
    pub fn register(&self, kind: AttachmentKind, source: Arc<dyn AttachmentSource>) {
        self.sources.insert(kind, source);
    }

    /// The source for `kind`, if registered.
    pub fn get(&self, kind: AttachmentKind) -> Option<Arc<dyn AttachmentSource>> {
        self.sources.get(&kind).map(|s| Arc::clone(s.value()))
    }
}

/// Routing through a mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationRoute {
    pub mediation_id: String,
    /// Connection to the mediator, used for keylist updates.
    pub connection_id: String,
    /// Mediator routing keys (verkeys or `did:key`).
    pub routing_keys: Vec<String>,
    /// Mediator endpoint that replaces ours.
    pub endpoint: String,
}

/// Mediation policy.
#[async_trait]
pub trait MediationRouter: Send + Sync + 'static {
    /// The tenant route for `mediation_id`, or the default route when `None`.
    async fn route(&self, mediation_id: Option<&str>) -> OobResult<Option<MediationRoute>>;

    /// The base wallet's route when this agent is a sub-wallet behind one.
    async fn base_wallet_route(&self) -> OobResult<Option<MediationRoute>>;

    /// Whether `mediation_id` names a known mediation.
    async fn is_known(&self, mediation_id: &str) -> OobResult<bool>;
}

/// No mediation at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMediation;

#[async_trait]
impl MediationRouter for NoMediation {
    async fn route(&self, _mediation_id: Option<&str>) -> OobResult<Option<MediationRoute>> {
        Ok(None)
    }

    async fn base_wallet_route(&self) -> OobResult<Option<MediationRoute>> {
        Ok(None)
    }

    async fn is_known(&self, _mediation_id: &str) -> OobResult<bool> {
        Ok(false)
    }
}

/// Processes an attached application message on behalf of an exchange.
///
/// Responses and notifications are the processor's concern.
#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    async fn handle_message(&self, content: serde_json::Value, record: OobRecord) -> OobResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Offers;

    #[async_trait]
    impl AttachmentSource for Offers {
        async fn fetch(&self, id: &str) -> OobResult<serde_json::Value> {
            Ok(json!({"@id": id, "@type": "https://didcomm.org/issue-credential/2.0/offer-credential"}))
        }
    }

    #[test]
    fn test_attachment_kind_parse() {
        assert_eq!(
            "credential-offer".parse::<AttachmentKind>().unwrap(),
            AttachmentKind::CredentialOffer
        );
        assert_eq!(
            "present-proof".parse::<AttachmentKind>().unwrap(),
            AttachmentKind::PresentProof
        );
        assert!(matches!(
            "basic-message".parse::<AttachmentKind>(),
            Err(OobError::InvalidInvitation(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = AttachmentRegistry::new();
        registry.register(AttachmentKind::CredentialOffer, Arc::new(Offers));
        assert!(registry.get(AttachmentKind::PresentProof).is_none());
        let source = registry.get(AttachmentKind::CredentialOffer).unwrap();
        assert_eq!(source.fetch("cx-1").await.unwrap()["@id"], "cx-1");
    }

    #[tokio::test]
    async fn test_static_resolver_accepts_qualified_dids() {
        let resolver = StaticResolver::new();
        resolver.insert(
            "WgWxqztrNooG92RXvxSTWv",
            ResolvedService {
                endpoint: "http://faber.example:8020".into(),
                recipient_keys: vec!["vk".into()],
                routing_keys: vec![],
            },
        );
        let svc = resolver.resolve("did:sov:WgWxqztrNooG92RXvxSTWv").await.unwrap();
        assert_eq!(svc.endpoint, "http://faber.example:8020");
        assert!(matches!(
            resolver.resolve("did:sov:unknown").await,
            Err(OobError::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn test_no_mediation() {
        let router = NoMediation;
        assert!(router.route(None).await.unwrap().is_none());
        assert!(router.base_wallet_route().await.unwrap().is_none());
        assert!(!router.is_known("m-1").await.unwrap());
    }
}
