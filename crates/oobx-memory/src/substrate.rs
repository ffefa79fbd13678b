//! RecordStore: one SQLite database shared by the per-kind stores.

use crate::connection::{self, ConnectionStore};
use crate::migration::run_migrations;
use crate::oob::{self, OobStore};
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::{OobError, OobResult};
use oobx_types::record::OobRecord;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A set of writes committed in one transaction.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    oob: Vec<OobRecord>,
    connections: Vec<ConnectionRecord>,
    deleted_connections: Vec<String>,
    // (oob_id, updated_at as stored) that must still match at commit time
    oob_guards: Vec<(String, String)>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Save an out-of-band record.
    pub fn save_oob(mut self, record: OobRecord) -> Self {
        self.oob.push(record);
        self
    }

    /// Save a connection record.
    pub fn save_connection(mut self, record: ConnectionRecord) -> Self {
        self.connections.push(record);
        self
    }

    /// Delete a connection record.
    pub fn delete_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.deleted_connections.push(connection_id.into());
        self
    }

    /// Fail the commit with [`OobError::StateConflict`] unless `record` is
    /// still stored exactly as it was read. Call before mutating `record`.
    pub fn require_oob_unchanged(mut self, record: &OobRecord) -> Self {
        self.oob_guards
            .push((record.oob_id.clone(), record.updated_at.to_rfc3339()));
        self
    }

    /// Out-of-band records in this batch.
    pub fn oob_records(&self) -> &[OobRecord] {
        &self.oob
    }

    /// Connection records in this batch.
    pub fn connection_records(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    /// Whether the batch has no writes.
    pub fn is_empty(&self) -> bool {
        self.oob.is_empty()
            && self.connections.is_empty()
            && self.deleted_connections.is_empty()
            && self.oob_guards.is_empty()
    }
}

/// The record store: owns the SQLite connection and hands out typed stores.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    oob: OobStore,
    connections: ConnectionStore,
}

impl RecordStore {
    /// Open (or create) the database at `db_path` and run migrations.
    pub fn open(db_path: &Path) -> OobResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OobError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(db_path).map_err(|e| OobError::Storage(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| OobError::Storage(e.to_string()))?;
        debug!(path = %db_path.display(), "Opened record store");
        Self::from_connection(conn)
    }

    /// An in-memory store, used by tests and throwaway agents.
    pub fn open_in_memory() -> OobResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| OobError::Storage(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> OobResult<Self> {
        run_migrations(&conn).map_err(|e| OobError::Storage(e.to_string()))?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            oob: OobStore::new(Arc::clone(&conn)),
            connections: ConnectionStore::new(Arc::clone(&conn)),
            conn,
        })
    }

    /// Out-of-band records.
    pub fn oob(&self) -> &OobStore {
        &self.oob
    }

    /// Connection records.
    pub fn connections(&self) -> &ConnectionStore {
        &self.connections
    }

    /// Commit every write in `batch` atomically.
    pub fn commit(&self, batch: &WriteBatch) -> OobResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| OobError::Storage(e.to_string()))?;
        for (oob_id, expected) in &batch.oob_guards {
            let stored: Option<String> = tx
                .query_row(
                    "SELECT updated_at FROM oob_records WHERE oob_id = ?1",
                    rusqlite::params![oob_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| OobError::Storage(e.to_string()))?;
            if stored.as_deref() != Some(expected.as_str()) {
                debug!(oob_id = %oob_id, "Guarded commit lost a race");
                return Err(OobError::StateConflict(format!(
                    "oob record {oob_id} was updated by another writer"
                )));
            }
        }
        for record in &batch.oob {
            oob::upsert(&tx, record)?;
        }
        for record in &batch.connections {
            connection::upsert(&tx, record)?;
        }
        for connection_id in &batch.deleted_connections {
            tx.execute(
                "DELETE FROM connections WHERE connection_id = ?1",
                rusqlite::params![connection_id],
            )
            .map_err(|e| OobError::Storage(e.to_string()))?;
        }
        tx.commit().map_err(|e| OobError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oobx_types::connection::{ConnectionState, TheirRole};
    use oobx_types::invitation::{HandshakeProtocol, Invitation, ServiceEntry};
    use oobx_types::record::OobState;

    fn invitation() -> Invitation {
        Invitation::new(
            "inv-1",
            None,
            vec![HandshakeProtocol::Rfc23.qualified()],
            vec![],
            vec![ServiceEntry::Did("did:sov:faber".into())],
        )
    }

    #[test]
    fn test_commit_writes_both_kinds() {
        let store = RecordStore::open_in_memory().unwrap();
        let conn = ConnectionRecord::new(ConnectionState::Active, TheirRole::Requester);
        let mut rec = OobRecord::new_sender(invitation(), None, None);
        rec.state = OobState::Accepted;
        rec.connection_id = Some(conn.connection_id.clone());

        store
            .commit(
                &WriteBatch::new()
                    .save_oob(rec.clone())
                    .save_connection(conn.clone()),
            )
            .unwrap();

        assert_eq!(store.oob().retrieve(&rec.oob_id).unwrap().state, OobState::Accepted);
        assert!(store.connections().get(&conn.connection_id).unwrap().is_some());
    }

    #[test]
    fn test_commit_deletes() {
        let store = RecordStore::open_in_memory().unwrap();
        let conn = ConnectionRecord::new(ConnectionState::Invitation, TheirRole::Requester);
        store.connections().save(&conn).unwrap();
        store
            .commit(&WriteBatch::new().delete_connection(conn.connection_id.clone()))
            .unwrap();
        assert!(store.connections().get(&conn.connection_id).unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("oobx.db");
        let rec = OobRecord::new_receiver(invitation(), None);
        {
            let store = RecordStore::open(&path).unwrap();
            store.oob().save(&rec).unwrap();
        }
        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.oob().retrieve(&rec.oob_id).unwrap(), rec);
    }

    #[test]
    fn test_guarded_commit_rejects_stale_read() {
        let store = RecordStore::open_in_memory().unwrap();
        let rec = OobRecord::new_sender(invitation(), None, None);
        store.oob().save(&rec).unwrap();

        let mut first = rec.clone();
        first.state = OobState::Accepted;
        first.updated_at = rec.updated_at + chrono::Duration::milliseconds(1);
        store
            .commit(&WriteBatch::new().require_oob_unchanged(&rec).save_oob(first))
            .unwrap();

        let mut second = rec.clone();
        second.state = OobState::NotAccepted;
        let err = store
            .commit(&WriteBatch::new().require_oob_unchanged(&rec).save_oob(second))
            .unwrap_err();
        assert!(matches!(err, OobError::StateConflict(_)));
        assert_eq!(store.oob().retrieve(&rec.oob_id).unwrap().state, OobState::Accepted);
    }

    #[test]
    fn test_guard_on_missing_record_conflicts() {
        let store = RecordStore::open_in_memory().unwrap();
        let rec = OobRecord::new_receiver(invitation(), None);
        let err = store
            .commit(&WriteBatch::new().require_oob_unchanged(&rec).save_oob(rec.clone()))
            .unwrap_err();
        assert!(matches!(err, OobError::StateConflict(_)));
        assert!(store.oob().get(&rec.oob_id).unwrap().is_none());
    }
}
