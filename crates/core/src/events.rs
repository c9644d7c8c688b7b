//! Notifications delivered from a session to its host.

use crate::state::{ConnectionState, ConversationState};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Speaker of a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Everything the host can observe about a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChange(ConnectionState),
    /// The turn-taking state moved, e.g. the AI started speaking.
    ConversationChange(ConversationState),
    Transcript { role: TranscriptRole, text: String },
    /// PCM16 little-endian audio to play back.
    Audio(Bytes),
    Error(String),
}

/// Receiving half handed to the host when a session is created.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;
