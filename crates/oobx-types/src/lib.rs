//! Core types for the oobx out-of-band invitation engine.
//!
//! This crate defines the shared data structures used by the record store,
//! the protocol messages, and the kernel. It contains no business logic
//! beyond validation and projection helpers.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod invitation;
pub mod record;
