//! Transport layer for the duplex voice-call engine
//!
//! One `ConversationTransport` interface, two strategies:
//!
//! - direct: straight to the remote agent host, agent id embedded in the
//!   streaming endpoint URL
//! - proxy: through a fixed relay for restrictive networks, agent id and
//!   session config carried in the first application message
//!
//! The strategy is selected once at connect time; jitter buffering and
//! transcript assembly live above this layer and are shared.

pub mod endpoint;
pub mod protocol;
pub mod traits;
pub mod websocket;

pub use endpoint::{resolve, ConnectionMode, Endpoint, EndpointSettings};
pub use protocol::{
    AgentOverride, AudioEvent, ClientMessage, ConfigOverride, InitiationMetadata, PingEvent,
    PromptOverride, ServerMessage, TtsOverride,
};
pub use traits::{ConversationTransport, TransportEvent};
pub use websocket::{DirectTransport, ProxyTransport};

use std::time::Duration;

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint could not be resolved; a configuration error, not a
    /// runtime fault. No retry or fallback.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Connection closed")]
    Closed,

    /// Malformed wire message; recoverable per-message
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    Ws(String),
}

impl From<TransportError> for voice_call_core::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Config(msg) => voice_call_core::Error::Config(msg),
            TransportError::Protocol(msg) => voice_call_core::Error::Protocol(msg),
            other => voice_call_core::Error::Transport(other.to_string()),
        }
    }
}

/// Build the transport for `mode`, resolving the endpoint up front.
pub fn create_transport(
    mode: ConnectionMode,
    agent_id: Option<&str>,
    settings: &EndpointSettings,
    proxy_timeout: Duration,
) -> Result<Box<dyn ConversationTransport>, TransportError> {
    let endpoint = resolve(mode, agent_id, settings)?;
    let transport: Box<dyn ConversationTransport> = match endpoint.mode {
        ConnectionMode::Direct => Box::new(DirectTransport::new(endpoint.url)),
        ConnectionMode::Proxy => Box::new(ProxyTransport::new(
            endpoint.url,
            agent_id.map(str::to_string),
            proxy_timeout,
        )),
    };
    Ok(transport)
}
