//! Wait for a persisted record to satisfy a predicate.
//!
//! [`wait_for`] subscribes to the record's topic family *before* reading the
//! stored value, so a change committed between the read and the first
//! `recv` is still delivered to the subscription.

use crate::event_bus::EventBus;
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::OobResult;
use oobx_types::event::{Event, CONNECTION_RECORD_TOPIC_PREFIX, OOB_RECORD_TOPIC_PREFIX};
use oobx_types::record::OobRecord;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A record kind whose saves are published on the bus.
pub trait WatchedRecord: Clone + Send + Sync + 'static {
    /// Topic prefix of this kind's save events.
    const TOPIC_PREFIX: &'static str;

    /// The record's primary id.
    fn record_id(&self) -> &str;

    /// Extract a record of this kind from an event payload.
    fn from_event(event: &Event) -> Option<&Self>;
}

impl WatchedRecord for OobRecord {
    const TOPIC_PREFIX: &'static str = OOB_RECORD_TOPIC_PREFIX;

    fn record_id(&self) -> &str {
        &self.oob_id
    }

    fn from_event(event: &Event) -> Option<&Self> {
        event.oob_record()
    }
}

impl WatchedRecord for ConnectionRecord {
    const TOPIC_PREFIX: &'static str = CONNECTION_RECORD_TOPIC_PREFIX;

    fn record_id(&self) -> &str {
        &self.connection_id
    }

    fn from_event(event: &Event) -> Option<&Self> {
        event.connection_record()
    }
}

/// Outcome of a wait.
#[derive(Debug, Clone, PartialEq)]
pub enum Waited<R> {
    /// The predicate held; carries the matching value.
    Satisfied(R),
    /// The deadline passed; carries the latest stored value.
    TimedOut(R),
}

impl<R> Waited<R> {
    /// Whether the predicate held before the deadline.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Waited::Satisfied(_))
    }

    /// The carried record.
    pub fn into_inner(self) -> R {
        match self {
            Waited::Satisfied(r) | Waited::TimedOut(r) => r,
        }
    }
}

/// Block until the record `record_id` satisfies `ready`, or `timeout` elapses.
///
/// `load` reads the current stored value. A timeout is not an error: the
/// latest stored value is returned as [`Waited::TimedOut`].
pub async fn wait_for<R, L, Fut, P>(
    bus: &EventBus,
    record_id: &str,
    timeout: Duration,
    load: L,
    ready: P,
) -> OobResult<Waited<R>>
where
    R: WatchedRecord,
    L: Fn() -> Fut,
    Fut: Future<Output = OobResult<R>>,
    P: Fn(&R) -> bool,
{
    let deadline = Instant::now() + timeout;
    let id = record_id.to_string();
    let mut sub = bus.subscribe_where(move |event| {
        event.topic_name().starts_with(R::TOPIC_PREFIX)
            && R::from_event(event).is_some_and(|r| r.record_id() == id)
    });

    let current = load().await?;
    if ready(&current) {
        return Ok(Waited::Satisfied(current));
    }
    debug!(record_id, timeout_ms = timeout.as_millis() as u64, "Waiting for record");

    loop {
        match tokio::time::timeout_at(deadline, sub.recv()).await {
            Ok(Ok(event)) => {
                if let Some(record) = R::from_event(&event) {
                    if ready(record) {
                        return Ok(Waited::Satisfied(record.clone()));
                    }
                }
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(record_id, skipped, "Waiter lagged behind the bus, re-reading record");
                let current = load().await?;
                if ready(&current) {
                    return Ok(Waited::Satisfied(current));
                }
            }
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }

    let latest = load().await?;
    if ready(&latest) {
        Ok(Waited::Satisfied(latest))
    } else {
        debug!(record_id, "Wait timed out");
        Ok(Waited::TimedOut(latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oobx_types::connection::{ConnectionState, TheirRole};
    use oobx_types::invitation::{HandshakeProtocol, Invitation, ServiceEntry};
    use oobx_types::record::OobState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record() -> OobRecord {
        let mut rec = OobRecord::new_receiver(
            Invitation::new(
                "inv-1",
                None,
                vec![HandshakeProtocol::Rfc23.qualified()],
                vec![],
                vec![ServiceEntry::Did("did:sov:faber".into())],
            ),
            Some("conn-1".into()),
        );
        rec.state = OobState::AwaitResponse;
        rec
    }

    fn answered(r: &OobRecord) -> bool {
        r.state.is_reuse_answered()
    }

    #[tokio::test]
    async fn test_returns_immediately_when_already_ready() {
        let bus = EventBus::new();
        let mut rec = record();
        rec.state = OobState::Accepted;
        let id = rec.oob_id.clone();
        let waited = wait_for(
            &bus,
            &id,
            Duration::from_secs(30),
            || {
                let rec = rec.clone();
                async move { Ok(rec) }
            },
            answered,
        )
        .await
        .unwrap();
        assert_eq!(waited, Waited::Satisfied(rec));
    }

    #[tokio::test]
    async fn test_flip_between_subscribe_and_check_is_observed() {
        let bus = Arc::new(EventBus::new());
        let stale = record();
        let mut flipped = stale.clone();
        flipped.state = OobState::Accepted;
        let id = stale.oob_id.clone();
        let loads = Arc::new(AtomicUsize::new(0));

        // The first read observes the stale value while the flip is published
        // after the subscription was opened.
        let load = {
            let bus = Arc::clone(&bus);
            let loads = Arc::clone(&loads);
            move || {
                let bus = Arc::clone(&bus);
                let loads = Arc::clone(&loads);
                let stale = stale.clone();
                let flipped = flipped.clone();
                async move {
                    if loads.fetch_add(1, Ordering::SeqCst) == 0 {
                        bus.publish(Event::oob_saved(&flipped)).await;
                        Ok(stale)
                    } else {
                        Ok(flipped)
                    }
                }
            }
        };

        let started = std::time::Instant::now();
        let waited = wait_for(&bus, &id, Duration::from_secs(30), load, answered)
            .await
            .unwrap();
        assert!(waited.is_satisfied());
        assert_eq!(waited.into_inner().state, OobState::Accepted);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ignores_other_records_and_unready_saves() {
        let bus = Arc::new(EventBus::new());
        let rec = record();
        let id = rec.oob_id.clone();

        let publisher = {
            let bus = Arc::clone(&bus);
            let rec = rec.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let mut other = record();
                other.state = OobState::Accepted;
                bus.publish(Event::oob_saved(&other)).await;
                bus.publish(Event::oob_saved(&rec)).await;
                let mut rejected = rec.clone();
                rejected.state = OobState::NotAccepted;
                bus.publish(Event::oob_saved(&rejected)).await;
            })
        };

        let waited = wait_for(
            &bus,
            &id,
            Duration::from_secs(30),
            || {
                let rec = rec.clone();
                async move { Ok(rec) }
            },
            answered,
        )
        .await
        .unwrap();
        publisher.await.unwrap();
        let got = waited.into_inner();
        assert_eq!(got.oob_id, id);
        assert_eq!(got.state, OobState::NotAccepted);
    }

    #[tokio::test]
    async fn test_timeout_returns_latest_stored_value() {
        let bus = EventBus::new();
        let conn = ConnectionRecord::new(ConnectionState::Request, TheirRole::Inviter);
        let id = conn.connection_id.clone();
        let waited = wait_for(
            &bus,
            &id,
            Duration::from_millis(50),
            || {
                let conn = conn.clone();
                async move { Ok(conn) }
            },
            |c: &ConnectionRecord| c.is_ready(),
        )
        .await
        .unwrap();
        match waited {
            Waited::TimedOut(c) => assert_eq!(c.state, ConnectionState::Request),
            other => panic!("Expected timeout, got {other:?}"),
        }
    }
}
