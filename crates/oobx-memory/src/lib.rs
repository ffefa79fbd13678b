//! Record store for the oobx out-of-band invitation engine.
//!
//! Provides SQLite persistence for two record kinds:
//! - **Out-of-band records**: one per invitation exchange, queryable by
//!   invitation id and by the (invitation id, reuse id) pair
//! - **Connection records**: referenced by id, plus the lookups the engine
//!   needs (existing connection by public DID, stale single-use records)
//!
//! Multi-record updates go through [`WriteBatch`] so they commit atomically.

pub mod connection;
pub mod migration;
pub mod oob;

mod substrate;
pub use substrate::{RecordStore, WriteBatch};
