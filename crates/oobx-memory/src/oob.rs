//! SQLite store for out-of-band records.

use oobx_types::error::{OobError, OobResult};
use oobx_types::record::{OobRecord, OobRole, OobState};
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// Out-of-band record store backed by SQLite.
#[derive(Clone)]
pub struct OobStore {
    conn: Arc<Mutex<Connection>>,
}

impl OobStore {
    /// Create a new store wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert or replace a record.
    pub fn save(&self, record: &OobRecord) -> OobResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        upsert(&conn, record)
    }

    /// Load a record by id.
    pub fn get(&self, oob_id: &str) -> OobResult<Option<OobRecord>> {
        self.query_one(
            "SELECT record FROM oob_records WHERE oob_id = ?1",
            rusqlite::params![oob_id],
        )
    }

    /// Load a record by id, failing when it does not exist.
    pub fn retrieve(&self, oob_id: &str) -> OobResult<OobRecord> {
        self.get(oob_id)?
            .ok_or_else(|| OobError::RecordNotFound(format!("oob record {oob_id}")))
    }

    /// Find the record of an invitation, optionally restricted by role and state.
    ///
    /// When several match, the most recently updated wins.
    pub fn find_by_invitation(
        &self,
        invi_msg_id: &str,
        role: Option<OobRole>,
        states: &[OobState],
    ) -> OobResult<Option<OobRecord>> {
        let records = self.query_many(
            "SELECT record FROM oob_records WHERE invi_msg_id = ?1 ORDER BY updated_at DESC",
            rusqlite::params![invi_msg_id],
        )?;
        Ok(records.into_iter().find(|r| {
            role.map_or(true, |role| r.role == role)
                && (states.is_empty() || states.contains(&r.state))
        }))
    }

    /// Find the record correlated to a reuse exchange.
    pub fn find_by_reuse(
        &self,
        invi_msg_id: &str,
        reuse_msg_id: &str,
    ) -> OobResult<Option<OobRecord>> {
        self.query_one(
            "SELECT record FROM oob_records WHERE invi_msg_id = ?1 AND reuse_msg_id = ?2
             ORDER BY updated_at DESC LIMIT 1",
            rusqlite::params![invi_msg_id, reuse_msg_id],
        )
    }

    /// All records, oldest first.
    pub fn list(&self) -> OobResult<Vec<OobRecord>> {
        self.query_many(
            "SELECT record FROM oob_records ORDER BY created_at ASC",
            rusqlite::params![],
        )
    }

    fn query_one(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> OobResult<Option<OobRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        let raw: Option<String> = conn
            .query_row(sql, params, |row| row.get(0))
            .optional()
            .map_err(|e| OobError::Storage(e.to_string()))?;
        raw.map(|json| decode(&json)).transpose()
    }

    fn query_many(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> OobResult<Vec<OobRecord>> {
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
pub(crate) fn upsert(conn: &Connection, record: &OobRecord) -> OobResult<()> {
    let json = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO oob_records
             (oob_id, role, state, invi_msg_id, reuse_msg_id, connection_id, record, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(oob_id) DO UPDATE SET
             role = ?2, state = ?3, invi_msg_id = ?4, reuse_msg_id = ?5,
             connection_id = ?6, record = ?7, updated_at = ?9",
        rusqlite::params![
            record.oob_id,
            record.role.as_str(),
            record.state.as_str(),
            record.invi_msg_id,
            record.reuse_msg_id,
            record.connection_id,
            json,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| OobError::Storage(e.to_string()))?;
    Ok(())
}

fn decode(json: &str) -> OobResult<OobRecord> {
    serde_json::from_str(json).map_err(|e| OobError::Serialization(e.to_string()))
}
