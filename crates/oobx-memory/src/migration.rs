//! SQLite schema creation and migration.
//!
//! Creates all tables needed by the record store on first open.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 2;

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Version 1: out-of-band and connection tables.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS oob_records (
            oob_id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            state TEXT NOT NULL,
            invi_msg_id TEXT NOT NULL,
            reuse_msg_id TEXT,
            connection_id TEXT,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_oob_invi_msg_id ON oob_records(invi_msg_id);
        CREATE INDEX IF NOT EXISTS idx_oob_reuse ON oob_records(invi_msg_id, reuse_msg_id);

        CREATE TABLE IF NOT EXISTS connections (
            connection_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            invitation_msg_id TEXT,
            invitation_mode TEXT NOT NULL,
            their_public_did TEXT,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conn_invitation ON connections(invitation_msg_id);
        ",
    )
}

/// Version 2: index connections by the other party's public DID.
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_conn_public_did ON connections(their_public_did);",
    )
}
