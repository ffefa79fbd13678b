//! Record store plus event bus: every save is announced.

use crate::event_bus::EventBus;
use chrono::Utc;
use oobx_memory::{RecordStore, WriteBatch};
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::OobResult;
use oobx_types::event::Event;
use oobx_types::record::{OobRecord, OobRole, OobState};
use std::sync::Arc;
use tracing::debug;

/// Persists records and publishes a record event after each successful write.
#[derive(Clone)]
pub struct Records {
    store: RecordStore,
    bus: Arc<EventBus>,
}

impl Records {
    pub fn new(store: RecordStore, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// The bus record events are published on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Save an out-of-band record, stamping `updated_at`.
    pub async fn save_oob(&self, record: &mut OobRecord) -> OobResult<()> {
        record.updated_at = Utc::now();
        self.store.oob().save(record)?;
        debug!(oob_id = %record.oob_id, state = %record.state, "Saved oob record");
        self.bus.publish(Event::oob_saved(record)).await;
        Ok(())
    }

    /// Save an out-of-band record only if nobody wrote it since it was read.
    ///
    /// Fails with [`OobError::StateConflict`] when another writer got there
    /// first; `record` is left stamped but unsaved.
    ///
    /// [`OobError::StateConflict`]: oobx_types::error::OobError::StateConflict
    pub async fn save_oob_if_unchanged(&self, record: &mut OobRecord) -> OobResult<()> {
        let guard = WriteBatch::new().require_oob_unchanged(record);
        record.updated_at = Utc::now();
        self.commit(guard.save_oob(record.clone())).await
    }

    /// Save a connection record, stamping `updated_at`.
    pub async fn save_connection(&self, record: &mut ConnectionRecord) -> OobResult<()> {
        record.updated_at = Utc::now();
        self.store.connections().save(record)?;
        debug!(connection_id = %record.connection_id, state = %record.state, "Saved connection");
        self.bus.publish(Event::connection_saved(record)).await;
        Ok(())
    }

    /// Commit a batch atomically, then announce every saved record.
    pub async fn commit(&self, batch: WriteBatch) -> OobResult<()> {
        self.store.commit(&batch)?;
        for record in batch.oob_records() {
            self.bus.publish(Event::oob_saved(record)).await;
        }
        for record in batch.connection_records() {
            self.bus.publish(Event::connection_saved(record)).await;
        }
        Ok(())
    }

    pub fn get_oob(&self, oob_id: &str) -> OobResult<Option<OobRecord>> {
        self.store.oob().get(oob_id)
    }

    pub fn retrieve_oob(&self, oob_id: &str) -> OobResult<OobRecord> {
        self.store.oob().retrieve(oob_id)
    }

    pub fn list_oob(&self) -> OobResult<Vec<OobRecord>> {
        self.store.oob().list()
    }

    pub fn find_oob_by_invitation(
        &self,
        invi_msg_id: &str,
        role: Option<OobRole>,
        states: &[OobState],
    ) -> OobResult<Option<OobRecord>> {
        self.store.oob().find_by_invitation(invi_msg_id, role, states)
    }

    pub fn find_oob_by_reuse(
        &self,
        invi_msg_id: &str,
        reuse_msg_id: &str,
    ) -> OobResult<Option<OobRecord>> {
        self.store.oob().find_by_reuse(invi_msg_id, reuse_msg_id)
    }

    pub fn get_connection(&self, connection_id: &str) -> OobResult<Option<ConnectionRecord>> {
        self.store.connections().get(connection_id)
    }

    pub fn retrieve_connection(&self, connection_id: &str) -> OobResult<ConnectionRecord> {
        self.store.connections().retrieve(connection_id)
    }

    pub fn list_connections(&self) -> OobResult<Vec<ConnectionRecord>> {
        self.store.connections().list()
    }

    /// A ready connection with the party behind `their_public_did`.
    pub fn find_existing_connection(
        &self,
        their_public_did: &str,
    ) -> OobResult<Option<ConnectionRecord>> {
        self.store.connections().find_existing(their_public_did)
    }

    /// Single-use connections for `invi_msg_id` still in the invitation state.
    pub fn find_stale_connections(&self, invi_msg_id: &str) -> OobResult<Vec<ConnectionRecord>> {
        self.store.connections().find_stale(invi_msg_id)
    }

    /// Delete stale connections for `invi_msg_id`. Returns how many were removed.
    pub fn delete_stale_connections(&self, invi_msg_id: &str) -> OobResult<usize> {
        let mut removed = 0;
        for conn in self.find_stale_connections(invi_msg_id)? {
            if self.store.connections().delete(&conn.connection_id)? {
                debug!(connection_id = %conn.connection_id, invi_msg_id, "Deleted stale connection");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
