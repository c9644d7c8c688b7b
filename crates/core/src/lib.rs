//! Voice real-time session proxy.
//!
//! Bridges a client audio/control stream to an upstream duplex speech
//! endpoint: turn-taking, barge-in, tool calls and session lifecycle.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod session;
pub mod state;
pub mod tools;
pub mod upstream;

pub use config::VoiceSessionConfig;
pub use error::SessionError;
pub use events::{SessionEvent, SessionEvents, TranscriptRole};
pub use manager::{DefaultSessionFactory, SessionFactory, SessionManager};
pub use session::{SessionComponents, SessionHandler};
pub use state::{ConnectionState, ConversationState, SessionMetrics};
pub use tools::{NoTools, ToolContext, ToolExecutor, ToolResult, ToolSchema};
pub use upstream::{UpstreamConnection, UpstreamConnector, WebSocketConnector};
pub use voice_realtime_types::UPSTREAM_PCM16_SAMPLE_RATE;
