//! Events received from the upstream endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the upstream endpoint sends to the proxy.
///
/// Kinds the proxy does not consume deserialize to [`ServerEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseObject },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        #[serde(default)]
        response_id: String,
        item: OutputItem,
    },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        #[serde(default)]
        response_id: String,
        item: OutputItem,
    },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        /// Base64-encoded PCM16 audio.
        delta: String,
    },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        #[serde(default)]
        response_id: String,
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        #[serde(default)]
        response_id: String,
        transcript: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseObject },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        transcript: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        /// Some protocol revisions omit the name here; it is then recovered
        /// from the matching `response.output_item.added`.
        #[serde(default)]
        name: String,
        arguments: String,
    },
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// The wire name of this event, or `"unknown"` for unconsumed kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseOutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::ResponseOutputItemDone { .. } => "response.output_item.done",
            ServerEvent::ResponseAudioDelta { .. } => "response.audio.delta",
            ServerEvent::ResponseAudioDone { .. } => "response.audio.done",
            ServerEvent::ResponseAudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::ResponseAudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::InputAudioBufferSpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::InputAudioBufferSpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            ServerEvent::Error { .. } => "error",
            ServerEvent::RateLimitsUpdated { .. } => "rate_limits.updated",
            ServerEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// An output item announced inside a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub name: String,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub remaining: u64,
    #[serde(default)]
    pub reset_seconds: f64,
}
