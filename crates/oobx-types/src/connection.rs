//! Connection entity, as far as the out-of-band engine sees it.
//!
//! Connections are owned by the handshake protocols; this engine only
//! creates invitation-state records, re-points their invitation id on reuse,
//! and prunes stale single-use records.

use crate::invitation::{HandshakeProtocol, Invitation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Connection state, as tracked by the handshake protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Invitation created or received.
    Invitation,
    /// Request sent or received.
    Request,
    /// Response sent or received.
    Response,
    /// Channel usable.
    Active,
    /// Handshake finished.
    Completed,
    /// Given up.
    Abandoned,
}

impl ConnectionState {
    /// Stable storage and event-topic representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Invitation => "invitation",
            ConnectionState::Request => "request",
            ConnectionState::Response => "response",
            ConnectionState::Active => "active",
            ConnectionState::Completed => "completed",
            ConnectionState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invitation" => Ok(ConnectionState::Invitation),
            "request" => Ok(ConnectionState::Request),
            "response" => Ok(ConnectionState::Response),
            "active" => Ok(ConnectionState::Active),
            "completed" => Ok(ConnectionState::Completed),
            "abandoned" => Ok(ConnectionState::Abandoned),
            other => Err(format!("unknown connection state: {other}")),
        }
    }
}

/// How often an invitation behind a connection may be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationMode {
    /// Single use.
    #[default]
    Once,
    /// Multiple use.
    Multi,
    /// Static (pre-shared) connection.
    Static,
}

impl InvitationMode {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationMode::Once => "once",
            InvitationMode::Multi => "multi",
            InvitationMode::Static => "static",
        }
    }
}

/// Whether incoming requests are accepted automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptMode {
    /// Accept automatically.
    Auto,
    /// Wait for an explicit accept.
    #[default]
    Manual,
}

/// The role the other party plays in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheirRole {
    /// They sent the invitation.
    Inviter,
    /// They will send a request for our invitation.
    Requester,
    /// They respond to our request.
    Responder,
}

/// A connection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Unique connection id.
    pub connection_id: String,
    /// Handshake state.
    pub state: ConnectionState,
    /// Other party's role.
    pub their_role: TheirRole,
    /// Invitation this connection currently answers to.
    #[serde(default)]
    pub invitation_msg_id: Option<String>,
    /// Key the invitation was issued under.
    #[serde(default)]
    pub invitation_key: Option<String>,
    /// Single or multi use.
    #[serde(default)]
    pub invitation_mode: InvitationMode,
    /// Auto or manual accept.
    #[serde(default)]
    pub accept: AcceptMode,
    /// Local alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// Other party's public DID (unqualified), when known.
    #[serde(default)]
    pub their_public_did: Option<String>,
    /// Other party's label.
    #[serde(default)]
    pub their_label: Option<String>,
    /// Handshake protocol in use.
    #[serde(default)]
    pub connection_protocol: Option<HandshakeProtocol>,
    /// Invitation attached when we are the inviter.
    #[serde(default)]
    pub invitation: Option<Invitation>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last persisted update.
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// A fresh record in the given state.
    pub fn new(state: ConnectionState, their_role: TheirRole) -> Self {
        let now = Utc::now();
        Self {
            connection_id: Uuid::new_v4().to_string(),
            state,
            their_role,
            invitation_msg_id: None,
            invitation_key: None,
            invitation_mode: InvitationMode::Once,
            accept: AcceptMode::Manual,
            alias: None,
            their_public_did: None,
            their_label: None,
            connection_protocol: None,
            invitation: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the channel can carry messages.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Active | ConnectionState::Completed)
    }

    /// Single-use record for `invi_msg_id` that never progressed past the invitation.
    pub fn is_stale_for(&self, invi_msg_id: &str) -> bool {
        self.invitation_msg_id.as_deref() == Some(invi_msg_id)
            && self.invitation_mode == InvitationMode::Once
            && self.state == ConnectionState::Invitation
    }
}
