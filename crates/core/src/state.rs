//! Mutable session state: the two state machines and the metrics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Ready,
    Error,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal edge. Same-state moves are not edges.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (a, b) if a == b => false,
            (_, Disconnected) | (_, Error) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Authenticated) => true,
            (Authenticated, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Whose turn it is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    UserSpeaking,
    AiThinking,
    AiSpeaking,
    BargeIn,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationState::Idle => "idle",
            ConversationState::UserSpeaking => "user_speaking",
            ConversationState::AiThinking => "ai_thinking",
            ConversationState::AiSpeaking => "ai_speaking",
            ConversationState::BargeIn => "barge_in",
        };
        write!(f, "{name}")
    }
}

/// Counters and durations collected over a session. Values only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub connection_time_ms: u64,
    /// Delay until the first AI audio of the session. Recorded once.
    pub first_audio_latency_ms: Option<u64>,
    pub total_user_speech_ms: u64,
    pub total_ai_speech_ms: u64,
    pub utterance_count: u64,
    pub ai_response_count: u64,
    pub barge_in_count: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub tool_call_count: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl SessionMetrics {
    /// Records the first-audio latency unless one is already recorded.
    /// Returns whether the value was stored.
    pub fn record_first_audio_latency(&mut self, latency: Duration) -> bool {
        if self.first_audio_latency_ms.is_some() {
            return false;
        }
        // Sub-millisecond latencies still count as recorded.
        self.first_audio_latency_ms = Some((latency.as_millis() as u64).max(1));
        true
    }
}

/// Shared mutable state of one session.
#[derive(Debug)]
pub struct VoiceSessionState {
    pub connection_state: ConnectionState,
    pub conversation_state: ConversationState,
    pub current_response_id: Option<String>,
    pub current_item_id: Option<String>,
    /// Set once `response.cancel` went out for the current response.
    pub cancel_requested: bool,
    pub is_playing_audio: bool,
    pub user_speech_start_time: Option<Instant>,
    pub user_speech_end_time: Option<Instant>,
    pub ai_speech_start_time: Option<Instant>,
    pub response_created_time: Option<Instant>,
    /// Last time the conversation state changed.
    pub last_activity: Instant,
    pub metrics: SessionMetrics,
}

impl VoiceSessionState {
    pub fn new() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            conversation_state: ConversationState::Idle,
            current_response_id: None,
            current_item_id: None,
            cancel_requested: false,
            is_playing_audio: false,
            user_speech_start_time: None,
            user_speech_end_time: None,
            ai_speech_start_time: None,
            response_created_time: None,
            last_activity: Instant::now(),
            metrics: SessionMetrics::default(),
        }
    }

    /// Moves the conversation to `next`. Returns the previous state when it changed.
    pub fn set_conversation_state(&mut self, next: ConversationState) -> Option<ConversationState> {
        if self.conversation_state == next {
            return None;
        }
        let previous = std::mem::replace(&mut self.conversation_state, next);
        self.last_activity = Instant::now();
        Some(previous)
    }

    /// Closes the running AI speech interval, if any, into the metrics.
    pub fn finish_ai_speech(&mut self) {
        if let Some(started) = self.ai_speech_start_time.take() {
            self.metrics.total_ai_speech_ms += started.elapsed().as_millis() as u64;
        }
        self.is_playing_audio = false;
    }

    /// Forgets the active response after it completed or was cancelled.
    pub fn clear_response(&mut self) {
        self.current_response_id = None;
        self.current_item_id = None;
        self.cancel_requested = false;
        self.response_created_time = None;
    }
}

impl Default for VoiceSessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_connection_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Ready));
        for state in [Connecting, Connected, Authenticated, Ready, Error] {
            assert!(state.can_transition_to(Disconnected));
        }

        assert!(!Ready.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Connected.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Ready));
    }

    #[test]
    fn test_first_audio_latency_recorded_once() {
        let mut metrics = SessionMetrics::default();
        assert!(metrics.record_first_audio_latency(Duration::from_millis(120)));
        assert!(!metrics.record_first_audio_latency(Duration::from_millis(5)));
        assert_eq!(metrics.first_audio_latency_ms, Some(120));
    }

    #[test]
    fn test_immediate_first_audio_latency_is_non_zero() {
        let mut metrics = SessionMetrics::default();
        assert!(metrics.record_first_audio_latency(Duration::from_micros(300)));
        assert_eq!(metrics.first_audio_latency_ms, Some(1));
        assert!(!metrics.record_first_audio_latency(Duration::from_millis(250)));
        assert_eq!(metrics.first_audio_latency_ms, Some(1));
    }

    #[test]
    fn test_conversation_state_change_reports_previous() {
        let mut state = VoiceSessionState::new();
        assert_eq!(state.set_conversation_state(ConversationState::Idle), None);
        assert_eq!(
            state.set_conversation_state(ConversationState::AiThinking),
            Some(ConversationState::Idle)
        );
        assert_eq!(state.conversation_state, ConversationState::AiThinking);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Ready.to_string(), "ready");
        assert_eq!(ConversationState::BargeIn.to_string(), "barge_in");
        assert_eq!(serde_json::to_string(&Authenticated).unwrap(), "\"authenticated\"");
    }
}
