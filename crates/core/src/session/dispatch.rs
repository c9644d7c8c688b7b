use super::SessionHandler;
use crate::{
    audio::{decode_pcm16, pcm16_to_bytes},
    error::SessionError,
    events::{SessionEvent, TranscriptRole},
    state::ConversationState,
};
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use voice_realtime_types::ServerEvent;

impl SessionHandler {
    /// Applies one upstream event to the session.
    pub(super) async fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
                debug!(kind = event.kind(), "Upstream acknowledged session.");
            }
            ServerEvent::ResponseCreated { response } => {
                {
                    let mut state = self.inner.state.lock();
                    state.current_response_id = Some(response.id);
                    state.current_item_id = None;
                    state.cancel_requested = false;
                    state.response_created_time = Some(Instant::now());
                }
                self.set_conversation_state(ConversationState::AiThinking);
            }
            ServerEvent::ResponseOutputItemAdded { item, .. } => {
                if let (Some(call_id), Some(name)) = (&item.call_id, &item.name) {
                    self.inner.pending_calls.lock().insert(call_id.clone(), name.clone());
                }
                if let Some(item_id) = item.id {
                    self.inner.state.lock().current_item_id = Some(item_id);
                }
            }
            ServerEvent::ResponseOutputItemDone { .. } => {}
            ServerEvent::ResponseAudioDelta {
                response_id, delta, ..
            } => self.handle_audio_delta(&response_id, &delta),
            ServerEvent::ResponseAudioDone { .. } => {
                self.inner.state.lock().finish_ai_speech();
            }
            ServerEvent::ResponseAudioTranscriptDelta { .. } => {}
            ServerEvent::ResponseAudioTranscriptDone { transcript, .. } => {
                self.emit(SessionEvent::Transcript {
                    role: TranscriptRole::Assistant,
                    text: transcript,
                });
            }
            ServerEvent::ResponseDone { response } => {
                {
                    let mut state = self.inner.state.lock();
                    state.finish_ai_speech();
                    state.clear_response();
                    state.metrics.ai_response_count += 1;
                }
                debug!(response_id = %response.id, status = ?response.status, "Response finished.");
                self.set_conversation_state(ConversationState::Idle);
            }
            ServerEvent::InputAudioBufferSpeechStarted { .. } => {
                {
                    let mut state = self.inner.state.lock();
                    state.user_speech_start_time = Some(Instant::now());
                    state.user_speech_end_time = None;
                }
                self.set_conversation_state(ConversationState::UserSpeaking);
            }
            ServerEvent::InputAudioBufferSpeechStopped { .. } => {
                let mut state = self.inner.state.lock();
                let now = Instant::now();
                if let Some(started) = state.user_speech_start_time.take() {
                    state.metrics.total_user_speech_ms += now.duration_since(started).as_millis() as u64;
                }
                state.user_speech_end_time = Some(now);
                state.metrics.utterance_count += 1;
            }
            ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
                self.emit(SessionEvent::Transcript {
                    role: TranscriptRole::User,
                    text: transcript,
                });
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.handle_function_call(call_id, name, arguments).await,
            ServerEvent::Error { error } => {
                self.inner.state.lock().metrics.error_count += 1;
                let err = SessionError::Upstream(error.message);
                warn!(error = %err, code = ?error.code, kind = ?error.kind, "Upstream error event.");
                self.emit(SessionEvent::Error(err.to_string()));
            }
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in &rate_limits {
                    debug!(name = %limit.name, remaining = limit.remaining, limit = limit.limit, "Rate limit update.");
                }
            }
            ServerEvent::Unknown => trace!("Ignoring unconsumed upstream event."),
        }
    }

    fn handle_audio_delta(&self, response_id: &str, delta: &str) {
        let first_chunk = {
            let state = self.inner.state.lock();
            if state.cancel_requested || state.conversation_state == ConversationState::BargeIn {
                trace!(%response_id, "Dropping audio for cancelled response.");
                return;
            }
            if !response_id.is_empty() && state.current_response_id.as_deref() != Some(response_id) {
                trace!(%response_id, "Dropping audio for inactive response.");
                return;
            }
            !state.is_playing_audio
        };

        let samples = match decode_pcm16(delta) {
            Ok(samples) => samples,
            Err(e) => {
                let err = SessionError::Protocol(format!("invalid audio delta: {e}"));
                warn!(error = %err, "Skipping audio chunk.");
                return;
            }
        };
        let audio = Bytes::from(pcm16_to_bytes(&samples));
        self.inner.audio.lock().reference = Some(samples);

        if first_chunk {
            let latency = {
                let mut state = self.inner.state.lock();
                let now = Instant::now();
                state.is_playing_audio = true;
                state.ai_speech_start_time = Some(now);
                let since = state.user_speech_end_time.or(state.response_created_time);
                match since {
                    Some(since) if state.metrics.record_first_audio_latency(now.duration_since(since)) => {
                        state.metrics.first_audio_latency_ms
                    }
                    _ => None,
                }
            };
            if let Some(latency_ms) = latency {
                debug!(latency_ms, "First AI audio of the session.");
            }
            self.set_conversation_state(ConversationState::AiSpeaking);
        }

        self.emit(SessionEvent::Audio(audio));
    }
}
