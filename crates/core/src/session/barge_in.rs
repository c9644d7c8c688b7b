//! Local barge-in policy.
//!
//! While the AI is speaking, sustained local speech arms a debounce timer.
//! If the VAD still hears the user when it fires, and the same response is
//! still the active one, the response is cancelled.

use super::SessionHandler;
use crate::{audio::SpeechState, state::ConversationState};
use std::sync::atomic::Ordering;
use tokio::time::Instant;
use tracing::{Instrument, debug, info};

/// Updates the local speech onset from a VAD classification and returns it.
pub(super) fn track_local_speech(started: &mut Option<Instant>, speech: SpeechState) -> Option<Instant> {
    match speech {
        SpeechState::SpeechStart => *started = Some(Instant::now()),
        SpeechState::Speaking => {
            started.get_or_insert_with(Instant::now);
        }
        SpeechState::SpeechEnd | SpeechState::Silence => *started = None,
    }
    *started
}

impl SessionHandler {
    pub(super) fn evaluate_barge_in(&self, speech: SpeechState, speech_started: Option<Instant>) {
        let config = &self.inner.config;
        if !config.barge_in_enabled {
            return;
        }
        if !matches!(speech, SpeechState::SpeechStart | SpeechState::Speaking) {
            return;
        }
        let Some(speech_started) = speech_started else {
            return;
        };
        if speech_started.elapsed() < config.barge_in_threshold() {
            return;
        }

        let response_id = {
            let state = self.inner.state.lock();
            let ai_audible = state.conversation_state == ConversationState::AiSpeaking || state.is_playing_audio;
            if !ai_audible || state.cancel_requested {
                return;
            }
            match &state.current_response_id {
                Some(id) => id.clone(),
                None => return,
            }
        };

        if self
            .inner
            .barge_in_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        debug!(%response_id, "Barge-in armed.");
        let handler = self.clone();
        let task = tokio::spawn(
            async move { handler.confirm_barge_in(response_id).await }.in_current_span(),
        );
        self.track_task(task);
    }

    /// Runs after the debounce window. Cancels only if the user is still
    /// speaking and `response_id` is still the response being played.
    async fn confirm_barge_in(&self, response_id: String) {
        tokio::time::sleep(self.inner.config.barge_in_debounce()).await;

        let still_speaking = self.inner.audio.lock().vad.is_speaking();
        // Upstream's own VAD may already have moved the conversation to
        // `UserSpeaking`; the response id is what decides.
        let still_active = {
            let state = self.inner.state.lock();
            !state.cancel_requested && state.current_response_id.as_deref() == Some(response_id.as_str())
        };

        if still_speaking && still_active {
            if self.cancel_response().await {
                {
                    let mut state = self.inner.state.lock();
                    state.finish_ai_speech();
                    state.metrics.barge_in_count += 1;
                }
                self.set_conversation_state(ConversationState::BargeIn);
                info!(%response_id, "Barge-in: user interrupted the response.");
            }
        } else {
            debug!(%response_id, still_speaking, still_active, "Barge-in not confirmed.");
        }

        self.inner.barge_in_pending.store(false, Ordering::Release);
    }
}
