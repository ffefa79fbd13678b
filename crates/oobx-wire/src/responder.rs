//! Outbound delivery seams.
//!
//! The engine never touches transports. It resolves where a message goes
//! through [`ConnectionTargets`] and hands the message to a [`Responder`],
//! which owns packing, encryption, and retry.

use crate::message::DidCommMessage;
use async_trait::async_trait;
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::OobResult;
use serde::{Deserialize, Serialize};

/// Where and how to deliver a message for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// The other party's DID, when known.
    pub did: Option<String>,
    /// Delivery endpoint.
    pub endpoint: String,
    /// The other party's label.
    pub label: Option<String>,
    /// Keys to encrypt for.
    pub recipient_keys: Vec<String>,
    /// Mediator keys to wrap forward messages for.
    pub routing_keys: Vec<String>,
    /// Our key for this connection.
    pub sender_key: Option<String>,
}

/// Sends DIDComm messages on behalf of the engine.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Send `message` to explicit targets.
    async fn send(&self, message: &DidCommMessage, targets: &[ConnectionTarget]) -> OobResult<()>;

    /// Send `message` over an established connection.
    async fn send_to_connection(
        &self,
        message: &DidCommMessage,
        connection_id: &str,
    ) -> OobResult<()>;
}

/// Resolves delivery targets for a connection.
#[async_trait]
pub trait ConnectionTargets: Send + Sync + 'static {
    /// Targets for `connection`; empty when none can be derived.
    async fn fetch(&self, connection: &ConnectionRecord) -> OobResult<Vec<ConnectionTarget>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HandshakeReuse;
    use oobx_types::connection::{ConnectionState, TheirRole};
    use oobx_types::error::OobError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl Responder for Outbox {
        async fn send(
            &self,
            message: &DidCommMessage,
            targets: &[ConnectionTarget],
        ) -> OobResult<()> {
            if targets.is_empty() {
                return Err(OobError::Transport("no targets".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((message.id().to_string(), targets.len()));
            Ok(())
        }

        async fn send_to_connection(
            &self,
            message: &DidCommMessage,
            _connection_id: &str,
        ) -> OobResult<()> {
            self.sent.lock().unwrap().push((message.id().to_string(), 1));
            Ok(())
        }
    }

    struct StaticTargets;

    #[async_trait]
    impl ConnectionTargets for StaticTargets {
        async fn fetch(&self, connection: &ConnectionRecord) -> OobResult<Vec<ConnectionTarget>> {
            Ok(vec![ConnectionTarget {
                did: connection.their_public_did.clone(),
                endpoint: "http://bob.example:8030".into(),
                label: connection.their_label.clone(),
                recipient_keys: vec!["vk-bob".into()],
                routing_keys: vec![],
                sender_key: None,
            }])
        }
    }

    #[tokio::test]
    async fn test_send_through_trait_objects() {
        let outbox = std::sync::Arc::new(Outbox::default());
        let responder: std::sync::Arc<dyn Responder> = outbox.clone();
        let targets: Box<dyn ConnectionTargets> = Box::new(StaticTargets);

        let conn = ConnectionRecord::new(ConnectionState::Active, TheirRole::Inviter);
        let resolved = targets.fetch(&conn).await.unwrap();
        let msg = DidCommMessage::HandshakeReuse(HandshakeReuse::new("inv-1"));
        responder.send(&msg, &resolved).await.unwrap();

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (msg.id().to_string(), 1));
    }

    #[test]
    fn test_send_without_targets_fails() {
        let outbox = Outbox::default();
        let msg = DidCommMessage::HandshakeReuse(HandshakeReuse::new("inv-1"));
        let result = tokio_test::block_on(outbox.send(&msg, &[]));
        assert!(matches!(result, Err(OobError::Transport(_))));
    }
}
