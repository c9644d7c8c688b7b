//! Per-session configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use uuid::Uuid;
use voice_realtime_types::{AudioTranscription, SessionConfig, ToolDefinition, TurnDetection};

/// Immutable parameters for a single voice session.
///
/// Built once when the session is created and owned by its handler for the
/// whole session lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSessionConfig {
    pub user_id: String,
    pub session_id: String,
    pub conversation_id: String,
    pub model: String,
    pub voice: String,
    /// System instructions forwarded to upstream, if any.
    #[serde(default)]
    pub instructions: Option<String>,

    pub echo_cancellation: bool,
    pub noise_suppression: bool,

    /// Speech probability above which a window counts as voiced (0.0-1.0).
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,

    pub barge_in_enabled: bool,
    /// Minimum duration of local speech before a barge-in is considered.
    pub barge_in_threshold_ms: u64,
    /// Confirmation delay between arming and issuing a barge-in cancel.
    pub barge_in_debounce_ms: u64,

    pub connection_timeout_sec: u64,
    pub response_timeout_sec: u64,
    pub idle_timeout_sec: u64,

    pub tools_enabled: bool,
    /// Restricts advertised tools to these categories. Empty means all.
    #[serde(default)]
    pub tool_categories: Vec<String>,
}

impl Default for VoiceSessionConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            session_id: String::new(),
            conversation_id: String::new(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            instructions: None,
            echo_cancellation: true,
            noise_suppression: true,
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            barge_in_enabled: true,
            barge_in_threshold_ms: 300,
            barge_in_debounce_ms: 150,
            connection_timeout_sec: 10,
            response_timeout_sec: 30,
            idle_timeout_sec: 300,
            tools_enabled: true,
            tool_categories: Vec::new(),
        }
    }
}

impl VoiceSessionConfig {
    /// Creates a config with default parameters and a freshly minted session id.
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    /// Checks the parameters for values that would make the session unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_id.is_empty() {
            return Err("session_id must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(format!(
                "vad_threshold must be within [0, 1], got {}",
                self.vad_threshold
            ));
        }
        for (name, value) in [
            ("connection_timeout_sec", self.connection_timeout_sec),
            ("response_timeout_sec", self.response_timeout_sec),
            ("idle_timeout_sec", self.idle_timeout_sec),
        ] {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn audio_processing_enabled(&self) -> bool {
        self.echo_cancellation || self.noise_suppression
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_sec)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_sec)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn barge_in_threshold(&self) -> Duration {
        Duration::from_millis(self.barge_in_threshold_ms)
    }

    pub fn barge_in_debounce(&self) -> Duration {
        Duration::from_millis(self.barge_in_debounce_ms)
    }

    /// Every configuration field keyed by its name.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let value = json!({
            "user_id": self.user_id,
            "session_id": self.session_id,
            "conversation_id": self.conversation_id,
            "model": self.model,
            "voice": self.voice,
            "echo_cancellation": self.echo_cancellation,
            "noise_suppression": self.noise_suppression,
            "vad_threshold": self.vad_threshold,
            "vad_prefix_padding_ms": self.vad_prefix_padding_ms,
            "vad_silence_duration_ms": self.vad_silence_duration_ms,
            "barge_in_enabled": self.barge_in_enabled,
            "barge_in_threshold_ms": self.barge_in_threshold_ms,
            "barge_in_debounce_ms": self.barge_in_debounce_ms,
            "connection_timeout_sec": self.connection_timeout_sec,
            "response_timeout_sec": self.response_timeout_sec,
            "idle_timeout_sec": self.idle_timeout_sec,
            "tools_enabled": self.tools_enabled,
            "tool_categories": self.tool_categories,
        });
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Builds the `session` object for `session.update`.
    pub fn to_session_update(&self, tools: Vec<ToolDefinition>) -> SessionConfig {
        let tools = if self.tools_enabled { tools } else { Vec::new() };
        let tool_choice = if tools.is_empty() { "none" } else { "auto" };
        SessionConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: self.instructions.clone(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(AudioTranscription {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetection {
                kind: "server_vad".to_string(),
                threshold: self.vad_threshold,
                prefix_padding_ms: self.vad_prefix_padding_ms,
                silence_duration_ms: self.vad_silence_duration_ms,
                create_response: true,
                // Interruption is decided locally by the barge-in policy.
                interrupt_response: false,
            }),
            tools,
            tool_choice: tool_choice.to_string(),
            metadata: self.to_metadata(),
        }
    }
}
