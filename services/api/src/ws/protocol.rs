//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! Microphone audio travels as binary frames of little-endian PCM16; every
//! other message is JSON tagged by `type`.

use base64::Engine;
use serde::{Deserialize, Serialize};
use voice_proxy_core::{ConnectionState, ConversationState, SessionEvent, TranscriptRole};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the voice session. This must be the first message.
    Init {
        user_id: String,
        conversation_id: String,
        /// Sample rate of the microphone audio the client will send.
        /// Defaults to the upstream rate.
        #[serde(default)]
        sample_rate: Option<u32>,
        #[serde(default)]
        instructions: Option<String>,
        #[serde(default)]
        tool_categories: Vec<String>,
    },
    /// A typed user turn.
    UserText { text: String },
    /// Interrupts the response currently being generated.
    CancelResponse,
    /// Ends the session.
    Stop,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session is connected upstream and ready for audio.
    Initialized { session_id: String },
    StateChange { state: ConnectionState },
    ConversationChange { state: ConversationState },
    Transcript { role: TranscriptRole, text: String },
    /// A chunk of audio data (base64 encoded PCM16) for the AI's voice.
    AudioChunk { data: String },
    Error { message: String },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::StateChange(state) => ServerMessage::StateChange { state },
            SessionEvent::ConversationChange(state) => ServerMessage::ConversationChange { state },
            SessionEvent::Transcript { role, text } => ServerMessage::Transcript { role, text },
            SessionEvent::Audio(pcm) => ServerMessage::AudioChunk {
                data: base64::engine::general_purpose::STANDARD.encode(&pcm),
            },
            SessionEvent::Error(message) => ServerMessage::Error { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_parse_init_with_defaults() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"init","user_id":"u1","conversation_id":"c1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                user_id: "u1".to_string(),
                conversation_id: "c1".to_string(),
                sample_rate: None,
                instructions: None,
                tool_categories: vec![],
            }
        );
    }

    #[test]
    fn test_parse_control_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"user_text","text":"hi"}"#).unwrap();
        assert_eq!(msg, ClientMessage::UserText { text: "hi".to_string() });
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"cancel_response"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CancelResponse);
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Stop);
    }

    #[test]
    fn test_session_events_map_to_server_messages() {
        let msg = ServerMessage::from(SessionEvent::StateChange(ConnectionState::Ready));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "state_change", "state": "ready"})
        );

        let msg = ServerMessage::from(SessionEvent::Transcript {
            role: TranscriptRole::Assistant,
            text: "Hello".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "transcript", "role": "assistant", "text": "Hello"})
        );

        let msg = ServerMessage::from(SessionEvent::Audio(Bytes::from_static(&[0x00, 0x40])));
        assert_eq!(msg, ServerMessage::AudioChunk { data: "AEA=".to_string() });

        let msg = ServerMessage::from(SessionEvent::ConversationChange(ConversationState::BargeIn));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "conversation_change", "state": "barge_in"})
        );
    }
}
