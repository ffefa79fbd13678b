//! Out-of-band exchange records.

use crate::invitation::Invitation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which side of the exchange created the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OobRole {
    /// Created the invitation.
    Sender,
    /// Received the invitation.
    Receiver,
}

impl OobRole {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OobRole::Sender => "sender",
            OobRole::Receiver => "receiver",
        }
    }
}

impl fmt::Display for OobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OobRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(OobRole::Sender),
            "receiver" => Ok(OobRole::Receiver),
            other => Err(format!("unknown oob role: {other}")),
        }
    }
}

/// Lifecycle state of an out-of-band record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OobState {
    /// Freshly received, nothing sent yet.
    #[serde(rename = "initial")]
    Initial,
    /// Waiting for the other party (invitation response or reuse answer).
    #[serde(rename = "await-response")]
    AwaitResponse,
    /// Connection reuse accepted.
    #[serde(rename = "reuse-accepted")]
    Accepted,
    /// Connection reuse rejected.
    #[serde(rename = "reuse-not-accepted")]
    NotAccepted,
    /// Exchange complete.
    #[serde(rename = "done")]
    Done,
}

impl OobState {
    /// Stable storage and event-topic representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OobState::Initial => "initial",
            OobState::AwaitResponse => "await-response",
            OobState::Accepted => "reuse-accepted",
            OobState::NotAccepted => "reuse-not-accepted",
            OobState::Done => "done",
        }
    }

    /// Whether a reuse exchange has reached an answer.
    pub fn is_reuse_answered(&self) -> bool {
        matches!(self, OobState::Accepted | OobState::NotAccepted)
    }

    /// Terminal states never move back to an earlier state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OobState::Accepted | OobState::NotAccepted | OobState::Done)
    }
}

impl fmt::Display for OobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(OobState::Initial),
            "await-response" => Ok(OobState::AwaitResponse),
            "reuse-accepted" => Ok(OobState::Accepted),
            "reuse-not-accepted" => Ok(OobState::NotAccepted),
            "done" => Ok(OobState::Done),
            other => Err(format!("unknown oob state: {other}")),
        }
    }
}

/// Persisted state of one invitation exchange on one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OobRecord {
    /// Unique record id.
    pub oob_id: String,
    /// Sender or receiver.
    pub role: OobRole,
    /// Current state.
    pub state: OobState,
    /// Id of the invitation message; correlates the whole exchange.
    pub invi_msg_id: String,
    /// Id of the in-flight reuse message, if any.
    #[serde(default)]
    pub reuse_msg_id: Option<String>,
    /// Bound connection, once a handshake or reuse has completed.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// The invitation itself.
    pub invitation: Invitation,
    /// Key used for connectionless attachment delivery.
    #[serde(default)]
    pub our_recipient_key: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last persisted update.
    pub updated_at: DateTime<Utc>,
}

impl OobRecord {
    fn new(
        role: OobRole,
        state: OobState,
        invitation: Invitation,
        connection_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            oob_id: Uuid::new_v4().to_string(),
            role,
            state,
            invi_msg_id: invitation.id().to_string(),
            reuse_msg_id: None,
            connection_id,
            invitation,
            our_recipient_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for an invitation we created; waits for the invitee.
    pub fn new_sender(
        invitation: Invitation,
        connection_id: Option<String>,
        our_recipient_key: Option<String>,
    ) -> Self {
        let mut record = Self::new(
            OobRole::Sender,
            OobState::AwaitResponse,
            invitation,
            connection_id,
        );
        record.our_recipient_key = our_recipient_key;
        record
    }

    /// Record for an invitation we received.
    pub fn new_receiver(invitation: Invitation, connection_id: Option<String>) -> Self {
        Self::new(OobRole::Receiver, OobState::Initial, invitation, connection_id)
    }
}

/// State of an [`InvitationRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationRecordState {
    /// Just created.
    Initial,
}

/// Non-persisted projection returned to the creator of an invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationRecord {
    /// Id of the backing [`OobRecord`].
    pub oob_id: String,
    /// Always [`InvitationRecordState::Initial`].
    pub state: InvitationRecordState,
    /// Invitation message id.
    pub invi_msg_id: String,
    /// The invitation.
    pub invitation: Invitation,
    /// URL form of the invitation.
    pub invitation_url: String,
}
