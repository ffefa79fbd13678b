//! Event bus: pub/sub with topic filtering and a history ring buffer.
//!
//! Every record save and every reuse notification is published here. Waiters
//! and tests subscribe with a filter; the history keeps the most recent events
//! for inspection.

use oobx_types::event::{Event, EventTopic};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Maximum events retained in the history ring buffer.
const HISTORY_SIZE: usize = 1000;

/// Capacity of the broadcast channel.
const CHANNEL_CAPACITY: usize = 1024;

type EventFilter = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// A filtered view of the bus. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl Subscription {
    /// Next event that passes the filter.
    ///
    /// `RecvError::Lagged` is passed through: the subscriber fell behind and
    /// must re-read whatever state it was tracking.
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}

/// The central event bus.
pub struct EventBus {
    /// Broadcast channel for all events.
    sender: broadcast::Sender<Event>,
    /// Event history ring buffer.
    history: Arc<RwLock<VecDeque<Event>>>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_SIZE))),
        }
    }

    /// Publish an event to the bus.
    pub async fn publish(&self, event: Event) {
        debug!(
            event_id = %event.id,
            topic = %event.topic,
            "Publishing event"
        );

        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events whose topic starts with `prefix`.
    pub fn subscribe_prefix(&self, prefix: &str) -> Subscription {
        let prefix = prefix.to_string();
        self.subscribe_where(move |event| event.topic_name().starts_with(&prefix))
    }

    /// Subscribe to events matching an arbitrary predicate.
    pub fn subscribe_where<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Subscription {
            rx: self.sender.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Get recent event history, newest first.
    pub async fn history(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Recent events on one topic, oldest first.
    pub async fn history_for(&self, topic: EventTopic) -> Vec<Event> {
        let history = self.history.read().await;
        history
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
