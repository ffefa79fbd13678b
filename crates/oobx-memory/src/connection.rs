//! SQLite store for connection records.

use oobx_types::connection::{ConnectionRecord, ConnectionState, InvitationMode};
use oobx_types::error::{OobError, OobResult};
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// Connection record store backed by SQLite.
#[derive(Clone)]
pub struct ConnectionStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConnectionStore {
    /// Create a new store wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert or replace a record.
    pub fn save(&self, record: &ConnectionRecord) -> OobResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        upsert(&conn, record)
    }

    /// Load a record by id.
    pub fn get(&self, connection_id: &str) -> OobResult<Option<ConnectionRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT record FROM connections WHERE connection_id = ?1",
                rusqlite::params![connection_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| OobError::Storage(e.to_string()))?;
        raw.map(|json| decode(&json)).transpose()
    }

    /// Load a record by id, failing when it does not exist.
    pub fn retrieve(&self, connection_id: &str) -> OobResult<ConnectionRecord> {
        self.get(connection_id)?
            .ok_or_else(|| OobError::RecordNotFound(format!("connection {connection_id}")))
    }

    /// Delete a record. Returns whether a row was removed.
    pub fn delete(&self, connection_id: &str) -> OobResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        let removed = conn
            .execute(
                "DELETE FROM connections WHERE connection_id = ?1",
                rusqlite::params![connection_id],
            )
            .map_err(|e| OobError::Storage(e.to_string()))?;
        Ok(removed > 0)
    }

    /// An established connection with the party behind `their_public_did`.
    pub fn find_existing(&self, their_public_did: &str) -> OobResult<Option<ConnectionRecord>> {
        let ready = [
            ConnectionState::Active.as_str(),
            ConnectionState::Completed.as_str(),
        ];
        let records = self.query_many(
            "SELECT record FROM connections
             WHERE their_public_did = ?1 AND state IN (?2, ?3)
             ORDER BY updated_at DESC",
            rusqlite::params![their_public_did, ready[0], ready[1]],
        )?;
        Ok(records.into_iter().next())
    }

    /// Single-use records for an invitation that never left the invitation state.
    pub fn find_stale(&self, invitation_msg_id: &str) -> OobResult<Vec<ConnectionRecord>> {
        self.query_many(
            "SELECT record FROM connections
             WHERE invitation_msg_id = ?1 AND invitation_mode = ?2 AND state = ?3",
            rusqlite::params![
                invitation_msg_id,
                InvitationMode::Once.as_str(),
                ConnectionState::Invitation.as_str()
            ],
        )
    }

    /// All records, oldest first.
    pub fn list(&self) -> OobResult<Vec<ConnectionRecord>> {
        self.query_many(
            "SELECT record FROM connections ORDER BY created_at ASC",
            rusqlite::params![],
        )
    }

    fn query_many(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> OobResult<Vec<ConnectionRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| OobError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(|e| OobError::Storage(e.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let json = row.map_err(|e| OobError::Storage(e.to_string()))?;
            records.push(decode(&json)?);
        }
        Ok(records)
    }
}

/// Insert or replace a record on an open connection or transaction.
pub(crate) fn upsert(conn: &Connection, record: &ConnectionRecord) -> OobResult<()> {
    let json = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO connections
             (connection_id, state, invitation_msg_id, invitation_mode, their_public_did, record, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(connection_id) DO UPDATE SET
             state = ?2, invitation_msg_id = ?3, invitation_mode = ?4,
             their_public_did = ?5, record = ?6, updated_at = ?8",
        rusqlite::params![
            record.connection_id,
            record.state.as_str(),
            record.invitation_msg_id,
            record.invitation_mode.as_str(),
            record.their_public_did,
            json,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| OobError::Storage(e.to_string()))?;
    Ok(())
}

fn decode(json: &str) -> OobResult<ConnectionRecord> {
    serde_json::from_str(json).map_err(|e| OobError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::run_migrations;
    use oobx_types::connection::TheirRole;

    fn setup() -> ConnectionStore {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        ConnectionStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_save_get_delete() {
        let store = setup();
        let conn = ConnectionRecord::new(ConnectionState::Active, TheirRole::Inviter);
        store.save(&conn).unwrap();
        assert_eq!(store.retrieve(&conn.connection_id).unwrap(), conn);
        assert!(store.delete(&conn.connection_id).unwrap());
        assert!(!store.delete(&conn.connection_id).unwrap());
        assert!(store.get(&conn.connection_id).unwrap().is_none());
    }

    #[test]
    fn test_find_existing_requires_ready_state() {
        let store = setup();
        let mut pending = ConnectionRecord::new(ConnectionState::Request, TheirRole::Inviter);
        pending.their_public_did = Some("faber".into());
        store.save(&pending).unwrap();
        assert!(store.find_existing("faber").unwrap().is_none());

        let mut ready = ConnectionRecord::new(ConnectionState::Active, TheirRole::Inviter);
        ready.their_public_did = Some("faber".into());
        store.save(&ready).unwrap();
        let found = store.find_existing("faber").unwrap().unwrap();
        assert_eq!(found.connection_id, ready.connection_id);
        assert!(store.find_existing("acme").unwrap().is_none());
    }

    #[test]
    fn test_find_stale() {
        let store = setup();
        let mut stale = ConnectionRecord::new(ConnectionState::Invitation, TheirRole::Requester);
        stale.invitation_msg_id = Some("inv-1".into());
        store.save(&stale).unwrap();

        let mut multi = ConnectionRecord::new(ConnectionState::Invitation, TheirRole::Requester);
        multi.invitation_msg_id = Some("inv-1".into());
        multi.invitation_mode = InvitationMode::Multi;
        store.save(&multi).unwrap();

        let mut active = ConnectionRecord::new(ConnectionState::Active, TheirRole::Requester);
        active.invitation_msg_id = Some("inv-1".into());
        store.save(&active).unwrap();

        let found = store.find_stale("inv-1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].connection_id, stale.connection_id);
    }
}
