//! WebSocket transports
//!
//! Both strategies run over one WebSocket carrying JSON text frames and
//! binary audio frames. The socket is split after connect: a writer task
//! drains an outbound channel, a reader task turns inbound frames into
//! [`TransportEvent`]s. Ordering is preserved in both directions because
//! each direction flows through a single queue.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use url::Url;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::traits::{ConversationTransport, TransportEvent};
use crate::TransportError;

/// Proxy handshake bound; polling-free, enforced with a timeout primitive
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Shared socket plumbing for both strategies
struct WsLink {
    url: Url,
    outbound: Option<mpsc::Sender<Outbound>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

impl WsLink {
    fn new(url: Url) -> Self {
        Self {
            url,
            outbound: None,
            events: None,
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url = %self.url, "websocket connected");

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);

        tokio::spawn(async move {
            while let Some(item) = out_rx.recv().await {
                let result = match item {
                    Outbound::Text(text) => ws_tx.send(Message::Text(text.into())).await,
                    Outbound::Binary(bytes) => ws_tx.send(Message::Binary(bytes.into())).await,
                    Outbound::Close => {
                        let _ = ws_tx.close().await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::debug!("websocket send failed: {e}");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::parse(&text) {
                        Ok(msg) => {
                            if event_tx.send(TransportEvent::Message(msg)).await.is_err() {
                                return;
                            }
                        }
                        // Malformed frame: recoverable, skip just this one.
                        Err(e) => tracing::warn!("ignoring malformed message: {e}"),
                    },
                    Ok(Message::Binary(bytes)) => {
                        if event_tx
                            .send(TransportEvent::Audio(bytes.to_vec()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = event_tx.send(TransportEvent::Closed { reason }).await;
                        return;
                    }
                    Ok(_) => {} // ping/pong handled by tungstenite
                    Err(e) => {
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                reason: Some(e.to_string()),
                            })
                            .await;
                        return;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed { reason: None }).await;
        });

        self.outbound = Some(out_tx);
        self.events = Some(event_rx);
        Ok(())
    }

    async fn send(&mut self, item: Outbound) -> Result<(), TransportError> {
        match &self.outbound {
            Some(tx) => tx.send(item).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match &mut self.events {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Outbound::Close).await;
        }
    }
}

/// Direct strategy: agent id lives in the endpoint URL, session
/// configuration is delegated to the remote host.
pub struct DirectTransport {
    link: WsLink,
}

impl DirectTransport {
    pub fn new(url: Url) -> Self {
        Self { link: WsLink::new(url) }
    }
}

#[async_trait]
impl ConversationTransport for DirectTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.link.connect().await
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        self.link.send(Outbound::Text(msg.to_json()?)).await
    }

    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), TransportError> {
        self.link.send(Outbound::Binary(pcm.to_vec())).await
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.link.next_event().await
    }

    async fn close(&mut self) {
        self.link.close().await
    }

    fn sends_session_config(&self) -> bool {
        false
    }

    fn connect_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Proxy strategy: fixed relay endpoint; the agent id and composed
/// session config travel in the first application message, and this side
/// must detect handshake completion itself, bounded by a timeout.
pub struct ProxyTransport {
    link: WsLink,
    agent_id: Option<String>,
    timeout: Duration,
}

impl ProxyTransport {
    pub fn new(url: Url, agent_id: Option<String>, timeout: Duration) -> Self {
        Self {
            link: WsLink::new(url),
            agent_id,
            timeout,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }
}

#[async_trait]
impl ConversationTransport for ProxyTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.link.connect().await?;

        // The relay needs to know which agent to bridge to before any
        // structured traffic flows.
        if let Some(agent_id) = &self.agent_id {
            let hello = serde_json::json!({ "type": "relay_init", "agent_id": agent_id });
            self.link.send(Outbound::Text(hello.to_string())).await?;
        }
        Ok(())
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        self.link.send(Outbound::Text(msg.to_json()?)).await
    }

    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), TransportError> {
        self.link.send(Outbound::Binary(pcm.to_vec())).await
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.link.next_event().await
    }

    async fn close(&mut self) {
        self.link.close().await
    }

    fn sends_session_config(&self) -> bool {
        true
    }

    fn connect_timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_flags() {
        let url = Url::parse("wss://relay.example.com/voice").unwrap();
        let proxy = ProxyTransport::new(url.clone(), Some("a1".into()), DEFAULT_PROXY_TIMEOUT);
        assert!(proxy.sends_session_config());
        assert_eq!(proxy.connect_timeout(), Some(DEFAULT_PROXY_TIMEOUT));
        assert_eq!(proxy.agent_id(), Some("a1"));

        let direct = DirectTransport::new(url);
        assert!(!direct.sends_session_config());
        assert!(direct.connect_timeout().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_closed() {
        let url = Url::parse("wss://relay.example.com/voice").unwrap();
        let mut direct = DirectTransport::new(url);
        let err = direct.send_audio(&[0, 0]).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
