//! Transport trait
//!
//! Abstract interface the session engine drives; direct and proxy
//! WebSocket transports implement it, and tests substitute scripted
//! fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::TransportError;

/// Inbound transport event
#[derive(Debug)]
pub enum TransportEvent {
    /// Structured message
    Message(ServerMessage),
    /// Raw PCM from the sibling binary channel
    Audio(Vec<u8>),
    /// Transport closed, by either side
    Closed { reason: Option<String> },
}

/// One bidirectional conversation connection
#[async_trait]
pub trait ConversationTransport: Send {
    /// Open the connection. Called once per session attempt.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send a structured message
    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError>;

    /// Send one captured audio frame
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), TransportError>;

    /// Next inbound event; `None` once the connection is fully closed
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);

    /// Whether this transport delivers the composed session config in
    /// response to the handshake (proxy mode). Direct mode delegates
    /// configuration to endpoint resolution.
    fn sends_session_config(&self) -> bool;

    /// Upper bound for connect + handshake, where this transport must
    /// detect handshake completion itself. `None` delegates to the
    /// remote endpoint.
    fn connect_timeout(&self) -> Option<Duration>;
}
