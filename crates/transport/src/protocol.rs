//! Wire protocol messages
//!
//! Structured messages are JSON objects discriminated by `type`; audio
//! also travels on a sibling binary channel that never goes through
//! JSON. Unknown message types deserialize to [`ServerMessage::Unknown`]
//! and are ignored for forward compatibility.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use voice_call_core::VariableBag;

use crate::TransportError;

/// Messages received from the remote agent
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake: first structured message, delivers the session id.
    /// Audio must not flow before this arrives.
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },

    /// Synthesized speech, Base64 16-bit PCM
    Audio { audio_event: AudioEvent },

    /// Agent utterance text
    AgentResponse { agent_response_event: AgentResponseEvent },

    /// Remote transcript of the user's speech
    UserTranscript { user_transcription_event: UserTranscriptEvent },

    /// Barge-in: the user spoke over the agent
    Interruption {
        #[serde(default)]
        interruption_event: Option<InterruptionEvent>,
    },

    /// Keepalive; must be answered with a pong carrying the same id
    Ping { ping_event: PingEvent },

    /// Remote-reported terminal error
    Error {
        #[serde(default)]
        error_event: Option<ErrorEvent>,
    },

    /// Remote is done; the client closes the transport proactively
    ConversationEnd {
        #[serde(default)]
        conversation_end_event: Option<serde_json::Value>,
    },

    /// Forward compatibility: unrecognized types are ignored silently
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiationMetadata {
    pub conversation_id: String,
    /// Advertised output format, e.g. `"pcm_16000"`
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
    #[serde(default)]
    pub user_input_audio_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: Option<i64>,
}

impl AudioEvent {
    /// Decode the Base64 payload to raw PCM bytes
    pub fn decode(&self) -> Result<Vec<u8>, TransportError> {
        BASE64
            .decode(&self.audio_base_64)
            .map_err(|e| TransportError::Protocol(format!("invalid audio payload: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptEvent {
    pub user_transcript: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptionEvent {
    #[serde(default)]
    pub event_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: i64,
    #[serde(default)]
    pub ping_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// Messages sent to the remote agent
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session config sent by the proxy transport in response to the
    /// handshake: dynamic variables plus the composed prompt override.
    ConversationInitiationClientData {
        dynamic_variables: VariableBag,
        conversation_config_override: ConfigOverride,
    },

    /// Keepalive reply, echoing the ping's correlation id
    Pong { event_id: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigOverride {
    pub agent: AgentOverride,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOverride {
    pub prompt: PromptOverride,
    pub first_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TtsOverride {
    pub voice_id: String,
}

impl ClientMessage {
    /// Build the handshake response from composed session inputs
    pub fn session_config(
        prompt: String,
        first_message: String,
        voice_id: Option<String>,
        dynamic_variables: VariableBag,
    ) -> Self {
        ClientMessage::ConversationInitiationClientData {
            dynamic_variables,
            conversation_config_override: ConfigOverride {
                agent: AgentOverride {
                    prompt: PromptOverride { prompt },
                    first_message,
                },
                tts: voice_id.map(|voice_id| TtsOverride { voice_id }),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handshake() {
        let msg = ServerMessage::parse(
            r#"{"type":"conversation_initiation_metadata",
                "conversation_initiation_metadata_event":{
                    "conversation_id":"conv-42",
                    "agent_output_audio_format":"pcm_16000"}}"#,
        )
        .unwrap();

        match msg {
            ServerMessage::ConversationInitiationMetadata {
                conversation_initiation_metadata_event: meta,
            } => {
                assert_eq!(meta.conversation_id, "conv-42");
                assert_eq!(meta.agent_output_audio_format.as_deref(), Some("pcm_16000"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_audio_and_decode() {
        let payload = BASE64.encode([0x01u8, 0x02, 0x03, 0x04]);
        let msg = ServerMessage::parse(&format!(
            r#"{{"type":"audio","audio_event":{{"audio_base_64":"{payload}","event_id":7}}}}"#
        ))
        .unwrap();

        match msg {
            ServerMessage::Audio { audio_event } => {
                assert_eq!(audio_event.decode().unwrap(), vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg = ServerMessage::parse(r#"{"type":"vad_score","vad_score_event":{"score":0.9}}"#)
            .unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }

    #[test]
    fn test_interruption_without_payload() {
        let msg = ServerMessage::parse(r#"{"type":"interruption"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Interruption { .. }));
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_session_config_serializes() {
        let msg = ClientMessage::session_config(
            "Hi\n\nBye".into(),
            "Hallo".into(),
            Some("voice-1".into()),
            VariableBag::new(),
        );
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "conversation_initiation_client_data");
        assert_eq!(
            json["conversation_config_override"]["agent"]["prompt"]["prompt"],
            "Hi\n\nBye"
        );
        assert_eq!(
            json["conversation_config_override"]["agent"]["first_message"],
            "Hallo"
        );
        assert_eq!(
            json["conversation_config_override"]["tts"]["voice_id"],
            "voice-1"
        );
    }

    #[test]
    fn test_session_config_omits_absent_voice() {
        let msg = ClientMessage::session_config("p".into(), "f".into(), None, VariableBag::new());
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(json["conversation_config_override"].get("tts").is_none());
    }

    #[test]
    fn test_pong_echoes_event_id() {
        let json: serde_json::Value =
            serde_json::from_str(&ClientMessage::Pong { event_id: 99 }.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["event_id"], 99);
    }
}
