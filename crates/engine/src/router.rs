//! Message router
//!
//! Single dispatch point between the transport and everything above it.
//! Structured messages fan out to playback, transcript assembly, and
//! session events; routing decisions come back to the run loop as an
//! outcome plus any replies to put on the wire. The router never touches
//! the transport itself.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use voice_call_audio::{AudioClock, PlaybackPipeline};
use voice_call_core::{ConnectionState, Error, TranscriptBuilder};
use voice_call_transport::{ClientMessage, ServerMessage, TransportEvent};

use crate::session::SessionEvent;

/// Wire format both sides are expected to speak
const WIRE_FORMAT: &str = "pcm_16000";

/// What the run loop should do after one routed event
#[derive(Debug)]
pub(crate) enum RouterOutcome {
    /// Keep going
    Continue,
    /// Conversation is over; close the transport and tear down
    Ended { reason: Option<String> },
    /// Remote-reported terminal error; tear down and surface it
    Fatal(Error),
}

/// Routed result: replies to send, then the outcome
pub(crate) struct RouterOutput {
    pub replies: Vec<ClientMessage>,
    pub outcome: RouterOutcome,
}

impl RouterOutput {
    fn next() -> Self {
        Self {
            replies: Vec::new(),
            outcome: RouterOutcome::Continue,
        }
    }

    fn reply(msg: ClientMessage) -> Self {
        Self {
            replies: vec![msg],
            outcome: RouterOutcome::Continue,
        }
    }

    fn ended(reason: Option<String>) -> Self {
        Self {
            replies: Vec::new(),
            outcome: RouterOutcome::Ended { reason },
        }
    }
}

pub(crate) struct MessageRouter {
    playback: Arc<Mutex<PlaybackPipeline>>,
    transcript: TranscriptBuilder,
    state: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<SessionEvent>,
    clock: Arc<dyn AudioClock>,
    /// Sent once, in response to the handshake, when the transport
    /// expects the client to deliver session config
    session_config: Option<ClientMessage>,
    /// Resolved with the conversation id when the handshake lands
    handshake: Option<oneshot::Sender<String>>,
}

impl MessageRouter {
    pub fn new(
        playback: Arc<Mutex<PlaybackPipeline>>,
        state: Arc<RwLock<ConnectionState>>,
        events: broadcast::Sender<SessionEvent>,
        clock: Arc<dyn AudioClock>,
        session_config: Option<ClientMessage>,
        handshake: oneshot::Sender<String>,
    ) -> Self {
        Self {
            playback,
            transcript: TranscriptBuilder::new(),
            state,
            events,
            clock,
            session_config,
            handshake: Some(handshake),
        }
    }

    pub fn route(&mut self, event: TransportEvent) -> RouterOutput {
        match event {
            TransportEvent::Audio(pcm) => {
                self.enqueue_audio(pcm);
                RouterOutput::next()
            }
            TransportEvent::Closed { reason } => RouterOutput::ended(reason),
            TransportEvent::Message(msg) => self.route_message(msg),
        }
    }

    fn route_message(&mut self, msg: ServerMessage) -> RouterOutput {
        match msg {
            ServerMessage::ConversationInitiationMetadata {
                conversation_initiation_metadata_event: meta,
            } => {
                check_format("agent output", meta.agent_output_audio_format.as_deref());
                check_format("user input", meta.user_input_audio_format.as_deref());

                *self.state.write() = ConnectionState::Connected;
                self.emit(SessionEvent::Connected {
                    conversation_id: meta.conversation_id.clone(),
                });
                if let Some(tx) = self.handshake.take() {
                    let _ = tx.send(meta.conversation_id);
                }

                match self.session_config.take() {
                    Some(config) => RouterOutput::reply(config),
                    None => RouterOutput::next(),
                }
            }

            ServerMessage::Audio { audio_event } => {
                match audio_event.decode() {
                    Ok(pcm) => self.enqueue_audio(pcm),
                    // One bad chunk is not fatal; skip it.
                    Err(e) => warn!("dropping undecodable audio chunk: {e}"),
                }
                RouterOutput::next()
            }

            ServerMessage::AgentResponse {
                agent_response_event,
            } => {
                let entry = self
                    .transcript
                    .agent_utterance(agent_response_event.agent_response, self.clock.now());
                self.emit(SessionEvent::Transcript(entry));
                RouterOutput::next()
            }

            ServerMessage::UserTranscript {
                user_transcription_event,
            } => {
                let entry = self
                    .transcript
                    .user_utterance(user_transcription_event.user_transcript, self.clock.now());
                self.emit(SessionEvent::Transcript(entry));
                RouterOutput::next()
            }

            ServerMessage::Interruption { .. } => {
                self.playback.lock().clear();
                RouterOutput::next()
            }

            ServerMessage::Ping { ping_event } => RouterOutput::reply(ClientMessage::Pong {
                event_id: ping_event.event_id,
            }),

            ServerMessage::Error { error_event } => {
                let message = error_event
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "unspecified remote error".into());
                RouterOutput {
                    replies: Vec::new(),
                    outcome: RouterOutcome::Fatal(Error::Remote(message)),
                }
            }

            ServerMessage::ConversationEnd { .. } => {
                RouterOutput::ended(Some("conversation ended by remote".into()))
            }

            // Forward compatibility: ignore, no state change.
            ServerMessage::Unknown => {
                debug!("ignoring unrecognized message type");
                RouterOutput::next()
            }
        }
    }

    fn enqueue_audio(&self, pcm: Vec<u8>) {
        if !self.state.read().is_connected() {
            warn!("dropping audio received before handshake");
            return;
        }
        self.playback.lock().enqueue(pcm);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

fn check_format(direction: &str, advertised: Option<&str>) {
    if let Some(fmt) = advertised {
        if fmt != WIRE_FORMAT {
            warn!("remote advertises {direction} format '{fmt}', expected '{WIRE_FORMAT}'");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use voice_call_audio::WallClock;
    use voice_call_core::Role;
    use voice_call_transport::protocol::{AgentResponseEvent, InitiationMetadata, PingEvent};

    fn test_router(
        session_config: Option<ClientMessage>,
    ) -> (
        MessageRouter,
        Arc<RwLock<ConnectionState>>,
        broadcast::Receiver<SessionEvent>,
        oneshot::Receiver<String>,
    ) {
        let playback = Arc::new(Mutex::new(PlaybackPipeline::simple(Arc::new(
            WallClock::new(),
        ))));
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let (events_tx, events_rx) = broadcast::channel(16);
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let router = MessageRouter::new(
            playback,
            Arc::clone(&state),
            events_tx,
            Arc::new(WallClock::new()),
            session_config,
            handshake_tx,
        );
        (router, state, events_rx, handshake_rx)
    }

    fn handshake(id: &str) -> TransportEvent {
        TransportEvent::Message(ServerMessage::ConversationInitiationMetadata {
            conversation_initiation_metadata_event: InitiationMetadata {
                conversation_id: id.to_string(),
                agent_output_audio_format: Some("pcm_16000".into()),
                user_input_audio_format: None,
            },
        })
    }

    #[tokio::test]
    async fn test_handshake_connects_and_replies_config() {
        let config = ClientMessage::session_config("p".into(), "f".into(), None, Default::default());
        let (mut router, state, mut events, handshake_rx) = test_router(Some(config));

        let out = router.route(handshake("conv-1"));
        assert_eq!(out.replies.len(), 1);
        assert!(matches!(out.outcome, RouterOutcome::Continue));
        assert!(state.read().is_connected());
        assert_eq!(handshake_rx.await.unwrap(), "conv-1");
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Connected { conversation_id } if conversation_id == "conv-1"
        ));
    }

    #[tokio::test]
    async fn test_handshake_without_config_sends_nothing() {
        let (mut router, _state, _events, _handshake_rx) = test_router(None);
        let out = router.route(handshake("conv-2"));
        assert!(out.replies.is_empty());
    }

    #[tokio::test]
    async fn test_ping_gets_pong_with_same_id() {
        let (mut router, _state, _events, _handshake_rx) = test_router(None);
        router.route(handshake("c"));

        let out = router.route(TransportEvent::Message(ServerMessage::Ping {
            ping_event: PingEvent {
                event_id: 42,
                ping_ms: None,
            },
        }));
        assert!(matches!(
            out.replies.as_slice(),
            [ClientMessage::Pong { event_id: 42 }]
        ));
    }

    #[tokio::test]
    async fn test_agent_response_becomes_transcript_event() {
        let (mut router, _state, mut events, _handshake_rx) = test_router(None);
        router.route(handshake("c"));
        let _ = events.recv().await;

        router.route(TransportEvent::Message(ServerMessage::AgentResponse {
            agent_response_event: AgentResponseEvent {
                agent_response: "Hello there".into(),
            },
        }));
        match events.recv().await.unwrap() {
            SessionEvent::Transcript(entry) => {
                assert_eq!(entry.role, Role::Agent);
                assert_eq!(entry.text, "Hello there");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_error_is_fatal() {
        let (mut router, _state, _events, _handshake_rx) = test_router(None);
        router.route(handshake("c"));

        let out = router.route(TransportEvent::Message(
            ServerMessage::parse(r#"{"type":"error","error_event":{"message":"quota"}}"#).unwrap(),
        ));
        match out.outcome {
            RouterOutcome::Fatal(Error::Remote(msg)) => assert_eq!(msg, "quota"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_type_changes_nothing() {
        let (mut router, state, _events, _handshake_rx) = test_router(None);
        router.route(handshake("c"));

        let out = router.route(TransportEvent::Message(
            ServerMessage::parse(r#"{"type":"telemetry","payload":{}}"#).unwrap(),
        ));
        assert!(matches!(out.outcome, RouterOutcome::Continue));
        assert!(out.replies.is_empty());
        assert!(state.read().is_connected());
    }

    #[tokio::test]
    async fn test_pre_handshake_audio_dropped() {
        let (mut router, _state, _events, _handshake_rx) = test_router(None);
        router.route(TransportEvent::Audio(vec![0u8; 512]));
        assert!(!router.playback.lock().is_speaking());
    }

    #[tokio::test]
    async fn test_conversation_end_ends_session() {
        let (mut router, _state, _events, _handshake_rx) = test_router(None);
        router.route(handshake("c"));

        let out = router.route(TransportEvent::Message(
            ServerMessage::parse(r#"{"type":"conversation_end"}"#).unwrap(),
        ));
        assert!(matches!(out.outcome, RouterOutcome::Ended { .. }));
    }
}
