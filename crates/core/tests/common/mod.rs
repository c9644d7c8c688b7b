//! In-memory upstream and scripted collaborators for session tests.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use voice_proxy_core::{
    ConnectionState, ConversationState, NoTools, SessionComponents, SessionEvent, SessionEvents,
    SessionFactory, SessionHandler, ToolContext, ToolExecutor, ToolResult, ToolSchema,
    UpstreamConnection, UpstreamConnector, VoiceSessionConfig,
    audio::{PassthroughProcessor, SpeechState, VoiceActivityDetector},
};

/// Test-side ends of an in-memory upstream connection.
pub struct MockUpstream {
    /// Frames the session sent upstream.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the session as if sent by upstream.
    pub inbound: mpsc::UnboundedSender<anyhow::Result<String>>,
}

impl MockUpstream {
    /// Delivers a server event to the session.
    pub fn push(&self, event: Value) {
        self.inbound
            .send(Ok(event.to_string()))
            .expect("session receiver is gone");
    }

    pub fn push_raw(&self, text: &str) {
        self.inbound
            .send(Ok(text.to_string()))
            .expect("session receiver is gone");
    }

    /// Waits for the next frame the session sends upstream.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for an upstream frame")
            .expect("upstream sink closed");
        serde_json::from_str(&text).expect("session sent invalid JSON")
    }

    /// Waits for the next sent frame that is not an audio append.
    pub async fn next_control(&mut self) -> Value {
        loop {
            let event = self.next_sent().await;
            if event["type"] != "input_audio_buffer.append" {
                return event;
            }
        }
    }

    /// Everything sent so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut sent = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            sent.push(serde_json::from_str(&text).expect("session sent invalid JSON"));
        }
        sent
    }
}

/// Builds a connected pair: the session half and the test half.
pub fn mock_connection() -> (UpstreamConnection, MockUpstream) {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<anyhow::Result<String>>();

    let sink = futures::sink::unfold(out_tx, |tx, text: String| async move {
        tx.send(text).map_err(|_| anyhow!("mock upstream closed"))?;
        Ok::<_, anyhow::Error>(tx)
    });
    let stream = futures::stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });

    (
        UpstreamConnection::new(sink, stream),
        MockUpstream {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

/// Hands out prepared connections in order; fails once they run out.
#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<VecDeque<UpstreamConnection>>,
}

impl MockConnector {
    /// A connector with one connection ready, and the test end of it.
    pub fn single() -> (Arc<Self>, MockUpstream) {
        let connector = Arc::new(Self::default());
        let upstream = connector.prepare();
        (connector, upstream)
    }

    pub fn prepare(&self) -> MockUpstream {
        let (connection, upstream) = mock_connection();
        self.connections.lock().push_back(connection);
        upstream
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    async fn connect(&self, _config: &VoiceSessionConfig) -> anyhow::Result<UpstreamConnection> {
        self.connections
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

/// Hands out prepared connections only after `delay`.
pub struct SlowConnector {
    pub delay: Duration,
    pub inner: MockConnector,
}

#[async_trait]
impl UpstreamConnector for SlowConnector {
    async fn connect(&self, config: &VoiceSessionConfig) -> anyhow::Result<UpstreamConnection> {
        tokio::time::sleep(self.delay).await;
        self.inner.connect(config).await
    }
}

/// Never completes the handshake.
pub struct HangingConnector;

#[async_trait]
impl UpstreamConnector for HangingConnector {
    async fn connect(&self, _config: &VoiceSessionConfig) -> anyhow::Result<UpstreamConnection> {
        futures::future::pending().await
    }
}

/// A VAD whose answer is flipped by the test.
pub struct ScriptedVad {
    speaking: Arc<AtomicBool>,
    was_speaking: bool,
}

impl ScriptedVad {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let speaking = Arc::new(AtomicBool::new(false));
        (
            Self {
                speaking: speaking.clone(),
                was_speaking: false,
            },
            speaking,
        )
    }
}

impl VoiceActivityDetector for ScriptedVad {
    fn process_chunk(&mut self, _audio: &[i16]) -> SpeechState {
        let speaking = self.speaking.load(Ordering::SeqCst);
        let state = match (speaking, self.was_speaking) {
            (true, false) => SpeechState::SpeechStart,
            (true, true) => SpeechState::Speaking,
            (false, true) => SpeechState::SpeechEnd,
            (false, false) => SpeechState::Silence,
        };
        self.was_speaking = speaking;
        state
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

/// What a [`RecordingTools`] call does.
#[derive(Clone)]
pub enum ToolBehavior {
    Succeed(ToolResult),
    Fail(String),
    Hang,
    Panic,
}

/// Tool executor that records calls and answers as configured.
pub struct RecordingTools {
    behavior: ToolBehavior,
    schemas: Vec<ToolSchema>,
    pub calls: Mutex<Vec<(String, Value, ToolContext)>>,
}

impl RecordingTools {
    pub fn new(behavior: ToolBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            schemas: Vec::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_schemas(behavior: ToolBehavior, schemas: Vec<ToolSchema>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            schemas,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ToolExecutor for RecordingTools {
    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        self.calls.lock().push((name.to_string(), args, ctx.clone()));
        match &self.behavior {
            ToolBehavior::Succeed(result) => Ok(result.clone()),
            ToolBehavior::Fail(message) => Err(anyhow!("{message}")),
            ToolBehavior::Hang => futures::future::pending().await,
            ToolBehavior::Panic => panic!("tool exploded"),
        }
    }

    async fn list_tool_schemas(&self) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(self.schemas.clone())
    }
}

pub fn schema(name: &str, category: Option<&str>) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: format!("The {name} tool"),
        parameters: json!({"type": "object", "properties": {}}),
        category: category.map(str::to_string),
    }
}

pub fn test_config() -> VoiceSessionConfig {
    VoiceSessionConfig::new("user-1", "conv-1")
}

/// Session pieces plus the switch that drives its VAD.
pub struct TestSession {
    pub handler: SessionHandler,
    pub events: SessionEvents,
    pub vad: Arc<AtomicBool>,
}

pub fn build_session(
    config: VoiceSessionConfig,
    connector: Arc<dyn UpstreamConnector>,
    tools: Arc<dyn ToolExecutor>,
) -> TestSession {
    let (vad, switch) = ScriptedVad::new();
    let components = SessionComponents {
        connector,
        tool_executor: tools,
        audio_processor: Box::new(PassthroughProcessor),
        vad: Box::new(vad),
    };
    let (handler, events) = SessionHandler::new(config, components);
    TestSession {
        handler,
        events,
        vad: switch,
    }
}

/// Starts a session against a fresh in-memory upstream and consumes the
/// `session.update` it sends.
pub async fn started_session(
    config: VoiceSessionConfig,
    tools: Arc<dyn ToolExecutor>,
) -> (TestSession, MockUpstream) {
    let (connector, mut upstream) = MockConnector::single();
    let mut session = build_session(config, connector, tools);
    session.handler.start().await.expect("session failed to start");
    let update = upstream.next_sent().await;
    assert_eq!(update["type"], "session.update");
    drain_events(&mut session.events);
    (session, upstream)
}

pub async fn started_default() -> (TestSession, MockUpstream) {
    started_session(test_config(), Arc::new(NoTools)).await
}

/// Events delivered so far, without waiting.
pub fn drain_events(events: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Waits until the session reports `state`, returning the events seen on
/// the way.
pub async fn wait_for_conversation(events: &mut SessionEvents, state: ConversationState) -> Vec<SessionEvent> {
    wait_for(events, |event| *event == SessionEvent::ConversationChange(state)).await
}

pub async fn wait_for_connection(events: &mut SessionEvents, state: ConnectionState) -> Vec<SessionEvent> {
    wait_for(events, |event| *event == SessionEvent::StateChange(state)).await
}

pub async fn wait_for(
    events: &mut SessionEvents,
    matches: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("session event channel closed");
        let done = matches(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Factory handing every session the same connector and no tools.
pub struct MockFactory {
    pub connector: Arc<MockConnector>,
}

impl SessionFactory for MockFactory {
    fn components(&self, _config: &VoiceSessionConfig) -> SessionComponents {
        let (vad, _) = ScriptedVad::new();
        SessionComponents {
            connector: self.connector.clone(),
            tool_executor: Arc::new(NoTools),
            audio_processor: Box::new(PassthroughProcessor),
            vad: Box::new(vad),
        }
    }
}
