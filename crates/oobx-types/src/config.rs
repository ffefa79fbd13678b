//! Engine configuration.

use crate::invitation::HandshakeProtocol;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What happens when a reuse attempt is rejected or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseFallback {
    /// Fall through to a handshake when the invitation lists protocols.
    #[default]
    Handshake,
    /// Fail with `ReuseRejected`.
    Fail,
}

/// How the inviter treats several invitees reusing one invitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Only the first reuse is accepted; later ones get a problem report.
    #[default]
    FirstWins,
    /// Every reuse is accepted; the binding follows the latest connection.
    AllowMultiple,
}

/// Top-level configuration, loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OobConfig {
    /// Label used when an invitation is created without one.
    pub default_label: String,
    /// Endpoint used when an invitation is created without one.
    pub default_endpoint: String,
    /// Whether invitations from the public DID may be created.
    pub public_invites: bool,
    /// Accept incoming connection requests automatically.
    pub auto_accept_requests: bool,
    /// Seconds to wait for a reuse answer.
    pub reuse_timeout_secs: u64,
    /// Seconds to wait for a connection to become ready before dispatching attachments.
    pub connection_ready_timeout_secs: u64,
    /// Behavior after a rejected reuse.
    pub reuse_fallback: ReuseFallback,
    /// Concurrent reuse policy on the inviter side.
    pub reuse_policy: ReusePolicy,
    /// Handshake protocols this agent can run, by preference.
    pub supported_handshake_protocols: Vec<HandshakeProtocol>,
    /// SQLite database path. `None` uses `<home>/data/oobx.db`.
    pub database_path: Option<PathBuf>,
    /// Default log filter.
    pub log_level: String,
}

impl Default for OobConfig {
    fn default() -> Self {
        Self {
            default_label: "oobx agent".to_string(),
            default_endpoint: "http://127.0.0.1:8020".to_string(),
            public_invites: false,
            auto_accept_requests: false,
            reuse_timeout_secs: 15,
            connection_ready_timeout_secs: 7,
            reuse_fallback: ReuseFallback::default(),
            reuse_policy: ReusePolicy::default(),
            supported_handshake_protocols: HandshakeProtocol::ALL.to_vec(),
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl OobConfig {
    /// Reuse wait as a [`Duration`].
    pub fn reuse_timeout(&self) -> Duration {
        Duration::from_secs(self.reuse_timeout_secs)
    }

    /// Connection readiness wait as a [`Duration`].
    pub fn connection_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_ready_timeout_secs)
    }
}
