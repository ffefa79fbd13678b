//! DIDComm protocol messages for out-of-band exchanges.
//!
//! Provides the messages this engine sends and receives, and the seams
//! through which they leave the process.
//!
//! ## Architecture
//!
//! - **DidCommMessage**: decoded inbound/outbound message, routed by `@type`
//! - **Thread**: `~thread` decorator correlating replies and invitations
//! - **did_key**: Ed25519 verkey <-> `did:key` conversion
//! - **Responder** / **ConnectionTargets**: traits for outbound delivery

pub mod did_key;
pub mod message;
pub mod responder;

pub use message::{
    ConnectionInvitation, DidCommMessage, HandshakeReuse, HandshakeReuseAccept, KeylistUpdate,
    OobProblemReport, Thread, WireError,
};
pub use responder::{ConnectionTarget, ConnectionTargets, Responder};
