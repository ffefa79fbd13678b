//! Core engine for out-of-band invitations.
//!
//! Creates invitations, receives them, and runs the connection-reuse
//! exchange between two agents. Everything outside the exchange itself
//! (transport, key storage, DID resolution, handshakes, attached request
//! processing) is reached through the traits in [`collaborators`],
//! [`handshake`], and `oobx_wire::responder`.
//!
//! ## Architecture
//!
//! - **OutOfBandManager**: entry point composing the pieces below
//! - **InvitationBuilder**: validates options and persists the sender's records
//! - **HandshakeNegotiator**: picks a handshake protocol and delegates to its capability
//! - **ReuseProtocol**: both halves of the reuse sub-protocol
//! - **EventBus** / **waiter**: record events and race-free waits on them

pub mod builder;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod handshake;
pub mod kernel;
pub mod manager;
pub mod offline;
pub mod records;
pub mod reuse;
pub mod waiter;
pub mod wallet;

pub use builder::{AttachmentRef, CreateInvitationRequest, InvitationBuilder};
pub use error::{KernelError, KernelResult};
pub use kernel::OobKernel;
pub use manager::{Collaborators, OutOfBandManager, ReceiveOptions};
