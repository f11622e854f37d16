//! Session connection state

use serde::{Deserialize, Serialize};

/// Connection state of a conversation session
///
/// One-way per attempt: `Disconnected -> Connecting -> Connected ->
/// Disconnected`. There is no resume; a new attempt needs a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport, no devices held
    Disconnected,
    /// Transport opening, handshake not yet acknowledged
    Connecting,
    /// Handshake complete, audio may flow
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}
