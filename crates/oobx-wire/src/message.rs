//! DIDComm message types.
//!
//! Messages are JSON objects routed by their `@type`. Either the current
//! `https://didcomm.org/` or the legacy `did:sov:…;spec/` prefix is accepted
//! on input; outbound messages always use the current prefix.

use oobx_types::error::OobError;
use oobx_types::invitation::{qualify, unqualify};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// `out-of-band/1.1/handshake-reuse`
pub const HANDSHAKE_REUSE: &str = "out-of-band/1.1/handshake-reuse";
/// `out-of-band/1.1/handshake-reuse-accepted`
pub const HANDSHAKE_REUSE_ACCEPTED: &str = "out-of-band/1.1/handshake-reuse-accepted";
/// `out-of-band/1.1/problem_report`
pub const PROBLEM_REPORT: &str = "out-of-band/1.1/problem_report";
/// `connections/1.0/invitation`
pub const CONNECTION_INVITATION: &str = "connections/1.0/invitation";
/// `coordinate-mediation/1.0/keylist-update`
pub const KEYLIST_UPDATE: &str = "coordinate-mediation/1.0/keylist-update";

/// Errors from message decoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message has no @type")]
    MissingType,
    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),
    #[error("Message {message_id} is missing thread field '{field}'")]
    MissingThread { message_id: String, field: &'static str },
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl From<WireError> for OobError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Json(e) => OobError::Serialization(e.to_string()),
            WireError::InvalidKey(msg) => OobError::KeyManagement(msg),
            other => OobError::InvalidInvitation(other.to_string()),
        }
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// `~thread` decorator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread id: the id of the first message of the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    /// Parent thread id: the invitation that started the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
}

impl Thread {
    /// Thread with both ids set.
    pub fn new(thid: impl Into<String>, pthid: impl Into<String>) -> Self {
        Self {
            thid: Some(thid.into()),
            pthid: Some(pthid.into()),
        }
    }
}

/// Invitee asks to reuse an existing connection for an invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReuse {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub msg_type: String,
    #[serde(rename = "~thread", default)]
    pub thread: Thread,
}

impl HandshakeReuse {
    /// A reuse message for `invitation_id`; the message starts its own thread.
    pub fn new(invitation_id: &str) -> Self {
        let id = new_message_id();
        Self {
            thread: Thread::new(id.clone(), invitation_id),
            id,
            msg_type: qualify(HANDSHAKE_REUSE),
        }
    }

    /// Thread id of the exchange (falls back to the message id).
    pub fn thread_id(&self) -> &str {
        self.thread.thid.as_deref().unwrap_or(&self.id)
    }

    /// The invitation this reuse refers to.
    pub fn invitation_id(&self) -> Result<&str, WireError> {
        self.thread.pthid.as_deref().ok_or(WireError::MissingThread {
            message_id: self.id.clone(),
            field: "pthid",
        })
    }
}

/// Inviter accepts a reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReuseAccept {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub msg_type: String,
    #[serde(rename = "~thread", default)]
    pub thread: Thread,
}

impl HandshakeReuseAccept {
    /// Reply to `reuse_msg_id` within `invitation_id`.
    pub fn new(reuse_msg_id: &str, invitation_id: &str) -> Self {
        Self {
            id: new_message_id(),
            msg_type: qualify(HANDSHAKE_REUSE_ACCEPTED),
            thread: Thread::new(reuse_msg_id, invitation_id),
        }
    }

    /// `(invitation id, reuse message id)` correlation pair.
    pub fn correlation(&self) -> Result<(&str, &str), WireError> {
        correlation(&self.id, &self.thread)
    }
}

/// Problem codes of an out-of-band problem report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemReportReason {
    /// The reuse message could not be processed.
    NoExistingConnection,
    /// The reuse-accept could not be processed.
    ExistingConnectionNotActive,
}

/// Problem description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDescription {
    pub code: ProblemReportReason,
    pub en: String,
}

/// Reuse rejected by the other party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OobProblemReport {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub msg_type: String,
    #[serde(rename = "~thread", default)]
    pub thread: Thread,
    pub description: ProblemDescription,
}

impl OobProblemReport {
    /// Report a problem with `reuse_msg_id` within `invitation_id`.
    pub fn new(
        reuse_msg_id: &str,
        invitation_id: &str,
        code: ProblemReportReason,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            id: new_message_id(),
            msg_type: qualify(PROBLEM_REPORT),
            thread: Thread::new(reuse_msg_id, invitation_id),
            description: ProblemDescription {
                code,
                en: explanation.into(),
            },
        }
    }

    /// `(invitation id, reuse message id)` correlation pair.
    pub fn correlation(&self) -> Result<(&str, &str), WireError> {
        correlation(&self.id, &self.thread)
    }
}

fn correlation<'a>(message_id: &str, thread: &'a Thread) -> Result<(&'a str, &'a str), WireError> {
    let pthid = thread.pthid.as_deref().ok_or_else(|| WireError::MissingThread {
        message_id: message_id.to_string(),
        field: "pthid",
    })?;
    let thid = thread.thid.as_deref().ok_or_else(|| WireError::MissingThread {
        message_id: message_id.to_string(),
        field: "thid",
    })?;
    Ok((pthid, thid))
}

/// Legacy connection invitation (RFC 0160), keys as base58 verkeys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInvitation {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "recipientKeys")]
    pub recipient_keys: Vec<String>,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,
}

impl ConnectionInvitation {
    /// Build a legacy invitation carrying explicit keys.
    pub fn new(
        id: impl Into<String>,
        label: Option<String>,
        recipient_keys: Vec<String>,
        service_endpoint: impl Into<String>,
        routing_keys: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            msg_type: qualify(CONNECTION_INVITATION),
            label,
            recipient_keys,
            service_endpoint: service_endpoint.into(),
            routing_keys,
        }
    }
}

/// Keylist update action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeylistAction {
    Add,
    Remove,
}

/// One keylist update rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdateRule {
    pub recipient_key: String,
    pub action: KeylistAction,
}

/// Registers routing keys with a mediator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeylistUpdate {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub msg_type: String,
    pub updates: Vec<KeylistUpdateRule>,
}

impl KeylistUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self {
            id: new_message_id(),
            msg_type: qualify(KEYLIST_UPDATE),
            updates: Vec::new(),
        }
    }

    /// Append an `add` rule for `recipient_key`.
    pub fn add_key(mut self, recipient_key: impl Into<String>) -> Self {
        self.updates.push(KeylistUpdateRule {
            recipient_key: recipient_key.into(),
            action: KeylistAction::Add,
        });
        self
    }
}

impl Default for KeylistUpdate {
    fn default() -> Self {
        Self::new()
    }
}

/// A DIDComm message this engine sends or receives.
#[derive(Debug, Clone, PartialEq)]
pub enum DidCommMessage {
    HandshakeReuse(HandshakeReuse),
    HandshakeReuseAccept(HandshakeReuseAccept),
    ProblemReport(OobProblemReport),
    ConnectionInvitation(ConnectionInvitation),
    KeylistUpdate(KeylistUpdate),
}

impl DidCommMessage {
    /// Decode a JSON message, routing on `@type`.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON message.
    pub fn from_value(value: serde_json::Value) -> Result<Self, WireError> {
        let msg_type = value
            .get("@type")
            .and_then(|t| t.as_str())
            .ok_or(WireError::MissingType)?
            .to_string();
        let msg = match unqualify(&msg_type) {
            HANDSHAKE_REUSE => DidCommMessage::HandshakeReuse(serde_json::from_value(value)?),
            HANDSHAKE_REUSE_ACCEPTED => {
                DidCommMessage::HandshakeReuseAccept(serde_json::from_value(value)?)
            }
            PROBLEM_REPORT => DidCommMessage::ProblemReport(serde_json::from_value(value)?),
            CONNECTION_INVITATION => {
                DidCommMessage::ConnectionInvitation(serde_json::from_value(value)?)
            }
            KEYLIST_UPDATE => DidCommMessage::KeylistUpdate(serde_json::from_value(value)?),
            _ => return Err(WireError::UnsupportedType(msg_type)),
        };
        Ok(msg)
    }

    /// Encode to a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value, WireError> {
        let value = match self {
            DidCommMessage::HandshakeReuse(m) => serde_json::to_value(m)?,
            DidCommMessage::HandshakeReuseAccept(m) => serde_json::to_value(m)?,
            DidCommMessage::ProblemReport(m) => serde_json::to_value(m)?,
            DidCommMessage::ConnectionInvitation(m) => serde_json::to_value(m)?,
            DidCommMessage::KeylistUpdate(m) => serde_json::to_value(m)?,
        };
        Ok(value)
    }

    /// Encode to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(&self.to_value()?)?)
    }

    /// Message id.
    pub fn id(&self) -> &str {
        match self {
            DidCommMessage::HandshakeReuse(m) => &m.id,
            DidCommMessage::HandshakeReuseAccept(m) => &m.id,
            DidCommMessage::ProblemReport(m) => &m.id,
            DidCommMessage::ConnectionInvitation(m) => &m.id,
            DidCommMessage::KeylistUpdate(m) => &m.id,
        }
    }

    /// The `~thread` decorator, for threaded messages.
    pub fn thread(&self) -> Option<&Thread> {
        match self {
            DidCommMessage::HandshakeReuse(m) => Some(&m.thread),
            DidCommMessage::HandshakeReuseAccept(m) => Some(&m.thread),
            DidCommMessage::ProblemReport(m) => Some(&m.thread),
            DidCommMessage::ConnectionInvitation(_) | DidCommMessage::KeylistUpdate(_) => None,
        }
    }

    /// Unqualified message type name, for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            DidCommMessage::HandshakeReuse(_) => HANDSHAKE_REUSE,
            DidCommMessage::HandshakeReuseAccept(_) => HANDSHAKE_REUSE_ACCEPTED,
            DidCommMessage::ProblemReport(_) => PROBLEM_REPORT,
            DidCommMessage::ConnectionInvitation(_) => CONNECTION_INVITATION,
            DidCommMessage::KeylistUpdate(_) => KEYLIST_UPDATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reuse_threads_to_itself_and_invitation() {
        let msg = HandshakeReuse::new("inv-1");
        assert_eq!(msg.thread_id(), msg.id);
        assert_eq!(msg.invitation_id().unwrap(), "inv-1");
        assert_eq!(msg.msg_type, "https://didcomm.org/out-of-band/1.1/handshake-reuse");
    }

    #[test]
    fn test_accept_correlation() {
        let accept = HandshakeReuseAccept::new("reuse-1", "inv-1");
        assert_eq!(accept.correlation().unwrap(), ("inv-1", "reuse-1"));
    }

    #[test]
    fn test_decode_routes_on_type() {
        let raw = json!({
            "@id": "m-1",
            "@type": "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/out-of-band/1.1/handshake-reuse-accepted",
            "~thread": {"thid": "reuse-1", "pthid": "inv-1"}
        });
        let msg = DidCommMessage::decode(raw.to_string().as_bytes()).unwrap();
        match msg {
            DidCommMessage::HandshakeReuseAccept(accept) => {
                assert_eq!(accept.correlation().unwrap(), ("inv-1", "reuse-1"));
            }
            other => panic!("Expected HandshakeReuseAccept, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_problem_report() {
        let report = OobProblemReport::new(
            "reuse-1",
            "inv-1",
            ProblemReportReason::NoExistingConnection,
            "invitation already used",
        );
        let bytes = DidCommMessage::ProblemReport(report.clone()).encode().unwrap();
        let decoded = DidCommMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, DidCommMessage::ProblemReport(report));
        assert_eq!(decoded.type_name(), PROBLEM_REPORT);
    }

    #[test]
    fn test_decode_rejects_unknown_and_untyped() {
        let unknown = json!({"@id": "x", "@type": "https://didcomm.org/basicmessage/1.0/message"});
        assert!(matches!(
            DidCommMessage::from_value(unknown),
            Err(WireError::UnsupportedType(_))
        ));
        assert!(matches!(
            DidCommMessage::from_value(json!({"@id": "x"})),
            Err(WireError::MissingType)
        ));
    }

    #[test]
    fn test_missing_thread_is_reported() {
        let raw = json!({
            "@id": "m-2",
            "@type": "https://didcomm.org/out-of-band/1.1/handshake-reuse"
        });
        let msg = match DidCommMessage::from_value(raw).unwrap() {
            DidCommMessage::HandshakeReuse(m) => m,
            other => panic!("Expected HandshakeReuse, got {other:?}"),
        };
        assert_eq!(msg.thread_id(), "m-2");
        assert!(matches!(
            msg.invitation_id(),
            Err(WireError::MissingThread { field: "pthid", .. })
        ));
    }

    #[test]
    fn test_keylist_update_serialization() {
        let update = KeylistUpdate::new().add_key("did:key:z6Mkabc");
        let value = DidCommMessage::KeylistUpdate(update).to_value().unwrap();
        assert_eq!(value["updates"][0]["action"], "add");
        assert_eq!(value["updates"][0]["recipient_key"], "did:key:z6Mkabc");
    }
}
