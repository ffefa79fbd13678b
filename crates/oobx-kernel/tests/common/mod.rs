//! Two in-process agents, each with its own store and event bus, connected
//! by tokio channels standing in for the transport.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use oobx_kernel::collaborators::{
    AttachmentKind, AttachmentRegistry, AttachmentSource, MessageProcessor, NoMediation,
    ResolvedService, StaticResolver,
};
use oobx_kernel::event_bus::EventBus;
use oobx_kernel::handshake::{
    HandshakeCapability, HandshakeInvitation, HandshakeRegistry, HandshakeRequest,
};
use oobx_kernel::records::Records;
use oobx_kernel::wallet::LocalWallet;
use oobx_kernel::{Collaborators, OutOfBandManager};
use oobx_memory::RecordStore;
use oobx_types::config::OobConfig;
use oobx_types::connection::{ConnectionRecord, ConnectionState, TheirRole};
use oobx_types::error::{OobError, OobResult};
use oobx_types::invitation::HandshakeProtocol;
use oobx_types::record::OobRecord;
use oobx_wire::{ConnectionTarget, ConnectionTargets, DidCommMessage, Responder};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message on its way to an agent, tagged with the receiving connection.
#[derive(Debug)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub connection_id: String,
}

const LOOPBACK: &str = "loopback://";

// ---------------------------------------------------------------------------
// Loopback transport: our connection id -> the peer's connection id
// ---------------------------------------------------------------------------

pub type Links = Arc<DashMap<String, String>>;

struct LoopbackResponder {
    peer: mpsc::UnboundedSender<Delivery>,
    links: Links,
    sent: Arc<Mutex<Vec<DidCommMessage>>>,
}

impl LoopbackResponder {
    fn deliver(&self, message: &DidCommMessage, peer_connection: &str) -> OobResult<()> {
        self.sent.lock().unwrap().push(message.clone());
        let body = message
            .encode()
            .map_err(|e| OobError::Serialization(e.to_string()))?;
        self.peer
            .send(Delivery {
                body,
                connection_id: peer_connection.to_string(),
            })
            .map_err(|_| OobError::Transport("peer is gone".into()))
    }
}

#[async_trait]
impl Responder for LoopbackResponder {
    async fn send(&self, message: &DidCommMessage, targets: &[ConnectionTarget]) -> OobResult<()> {
        let target = targets
            .first()
            .ok_or_else(|| OobError::Transport("no delivery targets".into()))?;
        let peer = target
            .endpoint
            .strip_prefix(LOOPBACK)
            .ok_or_else(|| OobError::Transport(format!("unroutable {}", target.endpoint)))?;
        self.deliver(message, peer)
    }

    async fn send_to_connection(
        &self,
        message: &DidCommMessage,
        connection_id: &str,
    ) -> OobResult<()> {
        let peer = self
            .links
            .get(connection_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| OobError::Transport(format!("no link for {connection_id}")))?;
        self.deliver(message, &peer)
    }
}

struct LinkTargets {
    links: Links,
}

#[async_trait]
impl ConnectionTargets for LinkTargets {
    async fn fetch(&self, connection: &ConnectionRecord) -> OobResult<Vec<ConnectionTarget>> {
        Ok(self
            .links
            .get(&connection.connection_id)
            .map(|peer| {
                vec![ConnectionTarget {
                    did: connection.their_public_did.clone(),
                    endpoint: format!("{LOOPBACK}{}", peer.value()),
                    label: connection.their_label.clone(),
                    recipient_keys: vec![],
                    routing_keys: vec![],
                    sender_key: None,
                }]
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Handshake stub: persists a requested connection
// ---------------------------------------------------------------------------

struct StubHandshake {
    protocol: HandshakeProtocol,
    records: Records,
    calls: Arc<Mutex<Vec<(HandshakeProtocol, HandshakeRequest)>>>,
    final_state: ConnectionState,
}

#[async_trait]
impl HandshakeCapability for StubHandshake {
    async fn establish(&self, request: HandshakeRequest) -> OobResult<ConnectionRecord> {
        let mut conn = ConnectionRecord::new(self.final_state, TheirRole::Inviter);
        conn.their_public_did = request.their_public_did.clone();
        conn.alias = request.alias.clone();
        conn.connection_protocol = Some(self.protocol);
        conn.invitation_msg_id = Some(match &request.invitation {
            HandshakeInvitation::OutOfBand(inv) => inv.id().to_string(),
            HandshakeInvitation::Legacy(inv) => inv.id.clone(),
        });
        self.records.save_connection(&mut conn).await?;
        self.calls.lock().unwrap().push((self.protocol, request));
        Ok(conn)
    }
}

// ---------------------------------------------------------------------------
// Attachments and the processor that receives them
// ---------------------------------------------------------------------------

struct OfferSource;

#[async_trait]
impl AttachmentSource for OfferSource {
    async fn fetch(&self, id: &str) -> OobResult<Value> {
        Ok(json!({
            "@id": id,
            "@type": "https://didcomm.org/issue-credential/2.0/offer-credential",
            "comment": "offer for the invitee",
        }))
    }
}

struct ChannelProcessor {
    tx: mpsc::UnboundedSender<(Value, OobRecord)>,
}

#[async_trait]
impl MessageProcessor for ChannelProcessor {
    async fn handle_message(&self, content: Value, record: OobRecord) -> OobResult<()> {
        self.tx
            .send((content, record))
            .map_err(|_| OobError::Internal("test dropped processor channel".into()))
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    pub manager: Arc<OutOfBandManager>,
    pub records: Records,
    pub wallet: Arc<LocalWallet>,
    pub resolver: Arc<StaticResolver>,
    pub links: Links,
    pub sent: Arc<Mutex<Vec<DidCommMessage>>>,
    pub handshakes: Arc<Mutex<Vec<(HandshakeProtocol, HandshakeRequest)>>>,
    pub processed: mpsc::UnboundedReceiver<(Value, OobRecord)>,
    inbox: Option<mpsc::UnboundedReceiver<Delivery>>,
}

/// Config with short waits so timeouts are observable in tests.
pub fn test_config() -> OobConfig {
    OobConfig {
        default_label: "Test Agent".into(),
        default_endpoint: "http://agent.example:8020".into(),
        public_invites: true,
        reuse_timeout_secs: 2,
        connection_ready_timeout_secs: 1,
        ..Default::default()
    }
}

impl Agent {
    fn build(
        config: OobConfig,
        peer: mpsc::UnboundedSender<Delivery>,
        inbox: mpsc::UnboundedReceiver<Delivery>,
        handshake_state: ConnectionState,
    ) -> Self {
        let store = RecordStore::open_in_memory().unwrap();
        let records = Records::new(store, Arc::new(EventBus::new()));
        let wallet = Arc::new(LocalWallet::new());
        let resolver = Arc::new(StaticResolver::new());
        let links: Links = Arc::new(DashMap::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let handshakes = Arc::new(Mutex::new(Vec::new()));

        let registry = HandshakeRegistry::new();
        for protocol in HandshakeProtocol::ALL {
            registry.register(
                protocol,
                Arc::new(StubHandshake {
                    protocol,
                    records: records.clone(),
                    calls: Arc::clone(&handshakes),
                    final_state: handshake_state,
                }),
            );
        }
        let attachments = AttachmentRegistry::new();
        attachments.register(AttachmentKind::CredentialOffer, Arc::new(OfferSource));
        let (processed_tx, processed) = mpsc::unbounded_channel();

        let collaborators = Collaborators {
            wallet: wallet.clone(),
            resolver: resolver.clone(),
            responder: Arc::new(LoopbackResponder {
                peer,
                links: Arc::clone(&links),
                sent: Arc::clone(&sent),
            }),
            targets: Arc::new(LinkTargets {
                links: Arc::clone(&links),
            }),
            mediation: Arc::new(NoMediation),
            processor: Arc::new(ChannelProcessor { tx: processed_tx }),
            attachments,
            handshakes: registry,
        };
        let manager = Arc::new(OutOfBandManager::new(config, records.clone(), collaborators));
        Self {
            manager,
            records,
            wallet,
            resolver,
            links,
            sent,
            handshakes,
            processed,
            inbox: Some(inbox),
        }
    }

    /// Start delivering inbound messages to the manager.
    pub fn start(&mut self) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                if let Err(e) = manager
                    .handle_inbound(&delivery.body, &delivery.connection_id)
                    .await
                {
                    tracing::warn!(error = %e, "Inbound handling failed");
                }
            }
        });
    }

    /// Messages this agent has sent, by type.
    pub fn sent_types(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.type_name()).collect()
    }

    /// Wait for the next attached request handed to the processor.
    pub async fn next_processed(&mut self) -> (Value, OobRecord) {
        tokio::time::timeout(Duration::from_secs(5), self.processed.recv())
            .await
            .expect("processor was not called")
            .expect("processor channel closed")
    }
}

/// An inviter and an invitee wired to each other. Handshakes on the invitee
/// produce connections in `handshake_state`. Pumps are not started.
pub fn agent_pair_with(
    inviter: OobConfig,
    invitee: OobConfig,
    handshake_state: ConnectionState,
) -> (Agent, Agent) {
    let (to_inviter, inviter_inbox) = mpsc::unbounded_channel();
    let (to_invitee, invitee_inbox) = mpsc::unbounded_channel();
    (
        Agent::build(inviter, to_invitee, inviter_inbox, handshake_state),
        Agent::build(invitee, to_inviter, invitee_inbox, handshake_state),
    )
}

pub fn agent_pair() -> (Agent, Agent) {
    agent_pair_with(test_config(), test_config(), ConnectionState::Active)
}

/// Give the inviter a public DID both agents can resolve. Returns the DID.
pub fn publish_inviter_did(inviter: &Agent, invitee: &Agent) -> String {
    let public = inviter.wallet.create_public_did().unwrap();
    let service = ResolvedService {
        endpoint: "http://inviter.example:8020".into(),
        recipient_keys: vec![public.verkey.clone()],
        routing_keys: vec![],
    };
    inviter.resolver.insert(public.did.clone(), service.clone());
    invitee.resolver.insert(public.did.clone(), service);
    public.did
}

/// Create an active connection between the two agents, known on both sides
/// as `connection_id`. The invitee knows the inviter by `inviter_did`.
pub async fn connect(
    inviter: &Agent,
    invitee: &Agent,
    connection_id: &str,
    inviter_did: &str,
) {
    let mut theirs = ConnectionRecord::new(ConnectionState::Active, TheirRole::Requester);
    theirs.connection_id = connection_id.to_string();
    inviter.records.save_connection(&mut theirs).await.unwrap();

    let mut ours = ConnectionRecord::new(ConnectionState::Active, TheirRole::Inviter);
    ours.connection_id = connection_id.to_string();
    ours.their_public_did = Some(inviter_did.to_string());
    invitee.records.save_connection(&mut ours).await.unwrap();

    inviter
        .links
        .insert(connection_id.to_string(), connection_id.to_string());
    invitee
        .links
        .insert(connection_id.to_string(), connection_id.to_string());
}
