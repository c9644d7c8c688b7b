//! The session handler: one upstream connection, one conversation.
//!
//! A started session runs three background tasks sharing the handler:
//!
//! - `sender`: drains the outgoing audio queue into `input_audio_buffer.append`.
//! - `receiver`: decodes upstream events and drives the state machines.
//! - `idle`: stops the session once the conversation has been quiet too long.
//!
//! Tasks run on a multi-threaded runtime, so shared state sits behind a
//! mutex that is never held across an `.await`, and the barge-in flag is an
//! atomic updated with compare-and-set.

mod barge_in;
mod dispatch;
mod loops;
mod tool_bridge;

use crate::{
    audio::{AudioProcessor, VoiceActivityDetector, pcm16_from_bytes},
    config::VoiceSessionConfig,
    error::SessionError,
    events::{SessionEvent, SessionEvents},
    state::{ConnectionState, ConversationState, SessionMetrics, VoiceSessionState},
    tools::ToolExecutor,
    upstream::{UpstreamConnection, UpstreamConnector, UpstreamSink},
};
use anyhow::Context;
use futures::SinkExt;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{Instrument, debug, error, info, instrument, warn};
use voice_realtime_types::{ClientEvent, Item, ToolDefinition};

/// Collaborators a session is built from.
pub struct SessionComponents {
    pub connector: Arc<dyn UpstreamConnector>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    pub audio_processor: Box<dyn AudioProcessor>,
    pub vad: Box<dyn VoiceActivityDetector>,
}

/// Microphone-side processing state.
struct AudioPipeline {
    processor: Box<dyn AudioProcessor>,
    vad: Box<dyn VoiceActivityDetector>,
    /// Last audio chunk received from upstream, used as echo reference.
    reference: Option<Vec<i16>>,
    /// When the local VAD last reported the start of speech.
    local_speech_started: Option<Instant>,
}

struct SessionInner {
    config: VoiceSessionConfig,
    state: Mutex<VoiceSessionState>,
    audio: Mutex<AudioPipeline>,
    barge_in_pending: AtomicBool,
    running: AtomicBool,
    has_connected: AtomicBool,
    /// Bumped by every `stop()` so an in-flight `start()` can tell it lost.
    stop_generation: AtomicU64,
    created_at: Instant,
    connector: Arc<dyn UpstreamConnector>,
    tool_executor: Arc<dyn ToolExecutor>,
    upstream: tokio::sync::Mutex<Option<UpstreamSink>>,
    audio_tx: Mutex<Option<mpsc::UnboundedSender<Vec<i16>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Function names announced by `response.output_item.added`, by call id.
    pending_calls: Mutex<HashMap<String, String>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Handle to a voice session. Clones share the same session.
#[derive(Clone)]
pub struct SessionHandler {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (connection_state, conversation_state) = {
            let state = self.inner.state.lock();
            (state.connection_state, state.conversation_state)
        };
        f.debug_struct("SessionHandler")
            .field("session_id", &self.session_id())
            .field("connection_state", &connection_state)
            .field("conversation_state", &conversation_state)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SessionHandler {
    /// Builds a session in the `Disconnected` state along with the receiver
    /// for its host notifications.
    pub fn new(config: VoiceSessionConfig, components: SessionComponents) -> (Self, SessionEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            config,
            state: Mutex::new(VoiceSessionState::new()),
            audio: Mutex::new(AudioPipeline {
                processor: components.audio_processor,
                vad: components.vad,
                reference: None,
                local_speech_started: None,
            }),
            barge_in_pending: AtomicBool::new(false),
            running: AtomicBool::new(false),
            has_connected: AtomicBool::new(false),
            stop_generation: AtomicU64::new(0),
            created_at: Instant::now(),
            connector: components.connector,
            tool_executor: components.tool_executor,
            upstream: tokio::sync::Mutex::new(None),
            audio_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            pending_calls: Mutex::new(HashMap::new()),
            events: events_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn config(&self) -> &VoiceSessionConfig {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection_state
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.inner.state.lock().conversation_state
    }

    pub fn current_response_id(&self) -> Option<String> {
        self.inner.state.lock().current_response_id.clone()
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.inner.state.lock().metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_barge_in_pending(&self) -> bool {
        self.inner.barge_in_pending.load(Ordering::Acquire)
    }

    /// Whether the session was connected and has since stopped, either by
    /// `stop()` or on its own after idling or losing upstream.
    pub fn has_ended(&self) -> bool {
        self.inner.has_connected.load(Ordering::Acquire)
            && !self.is_running()
            && matches!(
                self.connection_state(),
                ConnectionState::Disconnected | ConnectionState::Error
            )
    }

    /// Time since the handler was created.
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Connects upstream, configures the session and arms the background tasks.
    ///
    /// On failure the session is left in `Error` and the host is notified.
    /// A `stop()` that lands while the handshake is in flight wins: the
    /// connection is closed and `InvalidState` is returned.
    #[instrument(name = "session_start", skip_all, fields(session_id = %self.session_id()))]
    pub async fn start(&self) -> Result<(), SessionError> {
        let current = self.connection_state();
        if current != ConnectionState::Disconnected {
            return Err(SessionError::InvalidState(current));
        }
        let generation = self.inner.stop_generation.load(Ordering::Acquire);
        self.set_connection_state(ConnectionState::Connecting);

        let config = &self.inner.config;
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(config.connection_timeout(), self.inner.connector.connect(config)).await;
        if self.is_superseded(generation) {
            if let Ok(Ok(UpstreamConnection { mut sink, .. })) = outcome {
                if let Err(e) = sink.close().await {
                    warn!(error = ?e, "Failed to close abandoned upstream connection.");
                }
            }
            return Err(self.abandon_start());
        }
        let connection = match outcome {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(self.fail_connection(SessionError::Connection(format!("{e:#}")))),
            Err(_) => {
                return Err(self.fail_connection(SessionError::ConnectionTimeout(
                    config.connection_timeout(),
                )));
            }
        };
        let UpstreamConnection { sink, stream } = connection;
        *self.inner.upstream.lock().await = Some(sink);

        {
            let mut state = self.inner.state.lock();
            state.metrics.connection_time_ms = started.elapsed().as_millis() as u64;
            if self.inner.has_connected.swap(true, Ordering::AcqRel) {
                state.metrics.reconnect_count += 1;
            }
        }
        if !self.set_connection_state(ConnectionState::Connected) {
            self.close_upstream().await;
            return Err(self.abandon_start());
        }

        let tools = self.advertised_tools().await;
        let update = ClientEvent::SessionUpdate {
            session: config.to_session_update(tools),
        };
        let sent = self.send_event(update).await;
        if self.is_superseded(generation) {
            self.close_upstream().await;
            return Err(self.abandon_start());
        }
        if let Err(e) = sent {
            self.close_upstream().await;
            return Err(self.fail_connection(SessionError::Connection(format!(
                "failed to configure session: {e:#}"
            ))));
        }
        self.set_connection_state(ConnectionState::Authenticated);

        // Arming happens under the task lock, which `stop()` also takes
        // before bumping the generation, so the two cannot interleave.
        let armed = {
            let mut tasks = self.inner.tasks.lock();
            if self.is_superseded(generation) {
                false
            } else {
                let (audio_tx, audio_rx) = mpsc::unbounded_channel();
                *self.inner.audio_tx.lock() = Some(audio_tx);
                self.inner.state.lock().last_activity = Instant::now();
                self.inner.running.store(true, Ordering::Release);

                let session_id = self.session_id().to_string();
                let sender = tokio::spawn(
                    self.clone()
                        .run_sender(audio_rx)
                        .instrument(tracing::info_span!("voice_session", %session_id, task = "sender")),
                );
                let receiver = tokio::spawn(
                    self.clone()
                        .run_receiver(stream)
                        .instrument(tracing::info_span!("voice_session", %session_id, task = "receiver")),
                );
                let idle = tokio::spawn(
                    self.clone()
                        .run_idle_monitor()
                        .instrument(tracing::info_span!("voice_session", %session_id, task = "idle")),
                );
                tasks.extend([sender, receiver, idle]);
                self.set_connection_state(ConnectionState::Ready);
                true
            }
        };
        if !armed {
            self.close_upstream().await;
            return Err(self.abandon_start());
        }

        info!(connection_time_ms = started.elapsed().as_millis() as u64, "Voice session ready.");
        Ok(())
    }

    /// Cancels the background tasks, waits for them and closes upstream.
    ///
    /// Safe to call repeatedly and from any state; always ends `Disconnected`.
    #[instrument(name = "session_stop", skip_all, fields(session_id = %self.session_id()))]
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.tasks.lock();
            self.inner.stop_generation.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *tasks)
        };
        let was_running = self.inner.running.swap(false, Ordering::AcqRel);
        self.inner.audio_tx.lock().take();

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = ?e, "Session task ended abnormally.");
                }
            }
        }

        self.close_upstream().await;
        self.inner.barge_in_pending.store(false, Ordering::Release);
        self.set_connection_state(ConnectionState::Disconnected);
        if was_running {
            let metrics = self.metrics();
            info!(?metrics, "Voice session stopped.");
        }
    }

    /// Feeds one chunk of PCM16 microphone audio into the session.
    ///
    /// The chunk is cleaned, classified by the VAD, checked against the
    /// barge-in policy and queued for upstream in call order.
    pub fn send_audio(&self, pcm: &[u8]) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        let samples = pcm16_from_bytes(pcm);
        if samples.is_empty() {
            return Ok(());
        }

        let (processed, speech, speech_started) = {
            let mut audio = self.inner.audio.lock();
            let AudioPipeline {
                processor,
                vad,
                reference,
                local_speech_started,
            } = &mut *audio;
            let processed = if self.inner.config.audio_processing_enabled() {
                processor.process_chunk(&samples, reference.as_deref())
            } else {
                samples
            };
            let speech = vad.process_chunk(&processed);
            let speech_started = barge_in::track_local_speech(local_speech_started, speech);
            (processed, speech, speech_started)
        };

        self.evaluate_barge_in(speech, speech_started);

        let queue = self.inner.audio_tx.lock();
        let queue = queue.as_ref().ok_or(SessionError::NotRunning)?;
        queue.send(processed).map_err(|_| SessionError::NotRunning)
    }

    /// Sends a user text turn and asks for a response.
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        let item = ClientEvent::ConversationItemCreate {
            item: Item::user_text(text),
        };
        self.send_event(item)
            .await
            .map_err(|e| SessionError::Connection(format!("{e:#}")))?;
        self.send_event(ClientEvent::ResponseCreate { response: None })
            .await
            .map_err(|e| SessionError::Connection(format!("{e:#}")))
    }

    /// Cancels the active response. Returns whether a cancel was sent.
    ///
    /// A no-op without an active response or when a cancel for it already
    /// went out.
    pub async fn cancel_response(&self) -> bool {
        let response_id = {
            let mut state = self.inner.state.lock();
            if state.cancel_requested {
                return false;
            }
            let Some(response_id) = state.current_response_id.clone() else {
                return false;
            };
            state.cancel_requested = true;
            response_id
        };

        let cancel = ClientEvent::ResponseCancel {
            response_id: Some(response_id.clone()),
        };
        match self.send_event(cancel).await {
            Ok(()) => {
                debug!(%response_id, "Requested response cancellation.");
                true
            }
            Err(e) => {
                warn!(%response_id, error = ?e, "Failed to send response cancel.");
                false
            }
        }
    }

    /// Serializes and writes one event to upstream.
    async fn send_event(&self, event: ClientEvent) -> anyhow::Result<()> {
        let kind = event.kind();
        let text = serde_json::to_string(&event)?;
        {
            let mut upstream = self.inner.upstream.lock().await;
            let sink = upstream.as_mut().context("Upstream connection is closed")?;
            sink.send(text).await.with_context(|| format!("Failed to send {kind}"))?;
        }
        self.inner.state.lock().metrics.messages_sent += 1;
        Ok(())
    }

    async fn close_upstream(&self) {
        if let Some(mut sink) = self.inner.upstream.lock().await.take() {
            if let Err(e) = sink.close().await {
                warn!(error = ?e, "Failed to close upstream connection.");
            }
        }
    }

    async fn advertised_tools(&self) -> Vec<ToolDefinition> {
        let config = &self.inner.config;
        if !config.tools_enabled {
            return Vec::new();
        }
        match self.inner.tool_executor.list_tool_schemas().await {
            Ok(schemas) => schemas
                .into_iter()
                .filter(|schema| schema.in_categories(&config.tool_categories))
                .map(ToolDefinition::from)
                .collect(),
            Err(e) => {
                warn!(error = ?e, "Failed to list tools; advertising none.");
                Vec::new()
            }
        }
    }

    /// Moves the connection state machine along a legal edge and notifies the
    /// host. Same-state and illegal moves are ignored.
    fn set_connection_state(&self, next: ConnectionState) -> bool {
        {
            let mut state = self.inner.state.lock();
            let current = state.connection_state;
            if current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "Rejected invalid connection state transition.");
                return false;
            }
            state.connection_state = next;
        }
        info!(state = %next, "Connection state changed.");
        self.emit(SessionEvent::StateChange(next));
        true
    }

    fn set_conversation_state(&self, next: ConversationState) {
        let previous = self.inner.state.lock().set_conversation_state(next);
        if let Some(previous) = previous {
            debug!(from = %previous, to = %next, "Conversation state changed.");
            self.emit(SessionEvent::ConversationChange(next));
        }
    }

    /// Whether `stop()` ran since `generation` was read.
    fn is_superseded(&self, generation: u64) -> bool {
        self.inner.stop_generation.load(Ordering::Acquire) != generation
    }

    fn abandon_start(&self) -> SessionError {
        let err = SessionError::InvalidState(self.connection_state());
        info!("Session stopped during start; abandoning the connection.");
        err
    }

    fn fail_connection(&self, err: SessionError) -> SessionError {
        error!(error = %err, "Upstream connection failed.");
        self.inner.state.lock().metrics.error_count += 1;
        self.set_connection_state(ConnectionState::Error);
        self.emit(SessionEvent::Error(err.to_string()));
        err
    }

    fn emit(&self, event: SessionEvent) {
        // The host may have dropped its receiver; the session keeps running.
        let _ = self.inner.events.send(event);
    }

    fn track_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}
