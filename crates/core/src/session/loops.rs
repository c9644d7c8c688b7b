use super::SessionHandler;
use crate::{
    audio::encode_pcm16,
    error::SessionError,
    events::SessionEvent,
    state::ConnectionState,
    upstream::UpstreamStream,
};
use futures::StreamExt;
use std::{sync::atomic::Ordering, time::Duration};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, warn};
use voice_realtime_types::{ClientEvent, ServerEvent};

/// How long the sender waits on an empty queue before rechecking `running`.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl SessionHandler {
    /// Forwards queued microphone chunks upstream in the order they were queued.
    pub(super) async fn run_sender(self, mut audio_rx: mpsc::UnboundedReceiver<Vec<i16>>) {
        loop {
            match tokio::time::timeout(SEND_POLL_INTERVAL, audio_rx.recv()).await {
                Ok(Some(chunk)) => {
                    let append = ClientEvent::InputAudioBufferAppend {
                        audio: encode_pcm16(&chunk),
                    };
                    if let Err(e) = self.send_event(append).await {
                        warn!(error = ?e, "Failed to forward audio chunk.");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    if !self.is_running() {
                        break;
                    }
                }
            }
        }
        debug!("Sender loop finished.");
    }

    /// Reads upstream events until the stream ends or fails.
    ///
    /// Malformed frames are logged and skipped. A transport failure puts the
    /// session in `Error`; a clean close while running disconnects it.
    pub(super) async fn run_receiver(self, mut stream: UpstreamStream) {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    error!(error = ?e, "Upstream transport error.");
                    self.inner.state.lock().metrics.error_count += 1;
                    self.emit(SessionEvent::Error(format!("Upstream transport error: {e:#}")));
                    self.set_connection_state(ConnectionState::Error);
                    self.halt();
                    return;
                }
            };
            self.inner.state.lock().metrics.messages_received += 1;

            match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => self.dispatch(event).await,
                Err(e) => {
                    let err = SessionError::Protocol(e.to_string());
                    warn!(error = %err, "Skipping upstream message.");
                }
            }
        }

        if self.is_running() {
            info!("Upstream closed the connection.");
            self.set_connection_state(ConnectionState::Disconnected);
            self.halt();
        }
        debug!("Receiver loop finished.");
    }

    /// Stops the session once no conversation activity happened for the idle
    /// timeout.
    pub(super) async fn run_idle_monitor(self) {
        let idle_timeout = self.inner.config.idle_timeout();
        let period = (idle_timeout / 4).clamp(Duration::from_millis(50), Duration::from_secs(5));
        let mut ticker = tokio::time::interval(period);

        loop {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            let idle_for = self.inner.state.lock().last_activity.elapsed();
            if idle_for > idle_timeout {
                info!(idle_secs = idle_for.as_secs(), "Session idle; stopping.");
                // `stop` aborts this task, so it has to run elsewhere.
                let handler = self.clone();
                tokio::spawn(async move { handler.stop().await }.in_current_span());
                break;
            }
        }
    }

    /// Marks the session as no longer running and closes the audio queue.
    fn halt(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.audio_tx.lock().take();
    }
}
