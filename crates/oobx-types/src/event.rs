//! Event types for the internal event bus.
//!
//! Every persisted record change and every reuse notification flows through
//! the bus as an [`Event`]. Topics are hierarchical strings so subscribers can
//! filter by category (`oobx::record::out_of_band::…`) or by exact topic.

use crate::connection::{ConnectionRecord, ConnectionState};
use crate::record::{OobRecord, OobState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Topic prefix of out-of-band record events.
pub const OOB_RECORD_TOPIC_PREFIX: &str = "oobx::record::out_of_band::";

/// Topic prefix of connection record events.
pub const CONNECTION_RECORD_TOPIC_PREFIX: &str = "oobx::record::connections::";

/// Inviter-side notification: a connection is being reused.
pub const REUSE_WEBHOOK_TOPIC: &str = "oobx::webhook::connection_reuse";

/// Invitee-side notification: reuse accepted or rejected.
pub const REUSE_ACCEPTED_WEBHOOK_TOPIC: &str = "oobx::webhook::connection_reuse_accepted";

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Create a new random EventId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum EventTopic {
    /// An out-of-band record was saved in the given state.
    OutOfBand(OobState),
    /// A connection record was saved in the given state.
    Connection(ConnectionState),
    /// Inviter-side reuse notification.
    ConnectionReuse,
    /// Invitee-side reuse outcome notification.
    ConnectionReuseAccepted,
}

impl EventTopic {
    /// Whether this is a reuse notification (as opposed to a record event).
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            EventTopic::ConnectionReuse | EventTopic::ConnectionReuseAccepted
        )
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTopic::OutOfBand(state) => write!(f, "{OOB_RECORD_TOPIC_PREFIX}{state}"),
            EventTopic::Connection(state) => write!(f, "{CONNECTION_RECORD_TOPIC_PREFIX}{state}"),
            EventTopic::ConnectionReuse => f.write_str(REUSE_WEBHOOK_TOPIC),
            EventTopic::ConnectionReuseAccepted => f.write_str(REUSE_ACCEPTED_WEBHOOK_TOPIC),
        }
    }
}

/// Outcome tag carried by reuse notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseOutcome {
    /// The existing connection will be used.
    Accepted,
    /// The existing connection will not be used.
    Rejected,
}

/// Human-facing notification about a reuse exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuseNotice {
    /// The reuse message id (thread id of the exchange).
    pub thread_id: Option<String>,
    /// The connection offered for reuse.
    pub connection_id: String,
    /// Outcome tag, absent on the inviter-side notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReuseOutcome>,
    /// Free-text explanation.
    pub comment: String,
}

/// The payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Snapshot of an out-of-band record after a save.
    OutOfBand(Box<OobRecord>),
    /// Snapshot of a connection record after a save.
    Connection(Box<ConnectionRecord>),
    /// Reuse notification.
    Reuse(ReuseNotice),
}

/// An event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: EventId,
    /// Topic.
    pub topic: EventTopic,
    /// Payload.
    pub payload: EventPayload,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event.
    pub fn new(topic: EventTopic, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            topic,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Event announcing that `record` was persisted.
    pub fn oob_saved(record: &OobRecord) -> Self {
        Self::new(
            EventTopic::OutOfBand(record.state),
            EventPayload::OutOfBand(Box::new(record.clone())),
        )
    }

    /// Event announcing that `record` was persisted.
    pub fn connection_saved(record: &ConnectionRecord) -> Self {
        Self::new(
            EventTopic::Connection(record.state),
            EventPayload::Connection(Box::new(record.clone())),
        )
    }

    /// A reuse notification.
    pub fn reuse_notice(topic: EventTopic, notice: ReuseNotice) -> Self {
        Self::new(topic, EventPayload::Reuse(notice))
    }

    /// The full topic string.
    pub fn topic_name(&self) -> String {
        self.topic.to_string()
    }

    /// The out-of-band record carried by this event, if any.
    pub fn oob_record(&self) -> Option<&OobRecord> {
        match &self.payload {
            EventPayload::OutOfBand(rec) => Some(rec),
            _ => None,
        }
    }

    /// The connection record carried by this event, if any.
    pub fn connection_record(&self) -> Option<&ConnectionRecord> {
        match &self.payload {
            EventPayload::Connection(rec) => Some(rec),
            _ => None,
        }
    }

    /// The reuse notice carried by this event, if any.
    pub fn reuse(&self) -> Option<&ReuseNotice> {
        match &self.payload {
            EventPayload::Reuse(notice) => Some(notice),
            _ => None,
        }
    }
}
