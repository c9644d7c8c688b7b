//! Bounded registry of voice sessions.

use crate::{
    audio::{EnergyVad, PassthroughProcessor},
    config::VoiceSessionConfig,
    error::SessionError,
    events::SessionEvents,
    session::{SessionComponents, SessionHandler},
    tools::ToolExecutor,
    upstream::UpstreamConnector,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{info, instrument};
use voice_realtime_types::UPSTREAM_PCM16_SAMPLE_RATE;

/// Stops and drops handlers that ended without being removed, e.g. after an
/// idle timeout or an upstream close.
async fn reap_ended(sessions: &mut HashMap<String, SessionHandler>) -> usize {
    let ended: Vec<String> = sessions
        .iter()
        .filter(|(_, handler)| handler.has_ended())
        .map(|(id, _)| id.clone())
        .collect();
    for session_id in &ended {
        if let Some(handler) = sessions.remove(session_id) {
            handler.stop().await;
        }
    }
    if !ended.is_empty() {
        info!(reaped = ended.len(), "Reclaimed ended sessions.");
    }
    ended.len()
}

/// Builds the collaborators for each new session.
pub trait SessionFactory: Send + Sync {
    fn components(&self, config: &VoiceSessionConfig) -> SessionComponents;
}

/// Shares one connector and tool executor across sessions and gives each
/// session a passthrough processor and an energy VAD tuned from its config.
pub struct DefaultSessionFactory {
    connector: Arc<dyn UpstreamConnector>,
    tool_executor: Arc<dyn ToolExecutor>,
}

impl DefaultSessionFactory {
    pub fn new(connector: Arc<dyn UpstreamConnector>, tool_executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            connector,
            tool_executor,
        }
    }
}

impl SessionFactory for DefaultSessionFactory {
    fn components(&self, config: &VoiceSessionConfig) -> SessionComponents {
        SessionComponents {
            connector: self.connector.clone(),
            tool_executor: self.tool_executor.clone(),
            audio_processor: Box::new(PassthroughProcessor),
            vad: Box::new(EnergyVad::from_settings(
                config.vad_threshold,
                config.vad_silence_duration_ms,
                UPSTREAM_PCM16_SAMPLE_RATE,
            )),
        }
    }
}

/// Owns every live session. A handler present in the registry is owned by
/// it; removal always stops the handler first.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionHandler>>,
    max_sessions: usize,
    factory: Arc<dyn SessionFactory>,
}

impl SessionManager {
    pub fn new(max_sessions: usize, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            factory,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Registers a new, not yet started, session.
    ///
    /// Nothing is built when the registry is full or the id is taken.
    #[instrument(skip_all, fields(session_id = %config.session_id))]
    pub async fn create_session(
        &self,
        config: VoiceSessionConfig,
    ) -> Result<(SessionHandler, SessionEvents), SessionError> {
        config.validate().map_err(SessionError::InvalidConfig)?;

        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.max_sessions {
            reap_ended(&mut sessions).await;
        }
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::Capacity {
                max_sessions: self.max_sessions,
            });
        }
        if sessions.contains_key(&config.session_id) {
            return Err(SessionError::AlreadyExists(config.session_id));
        }

        let components = self.factory.components(&config);
        let session_id = config.session_id.clone();
        let (handler, events) = SessionHandler::new(config, components);
        sessions.insert(session_id, handler.clone());
        info!(active = sessions.len(), "Session registered.");
        Ok((handler, events))
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionHandler> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Stops and unregisters a session. Returns whether it was registered.
    #[instrument(skip(self))]
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(handler) = sessions.get(session_id).cloned() else {
            return false;
        };
        handler.stop().await;
        sessions.remove(session_id);
        info!(active = sessions.len(), "Session removed.");
        true
    }

    /// Stops and removes every session older than `max_age`, along with
    /// sessions that already ended on their own. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_sessions(&self, max_age: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, handler)| handler.age() > max_age || handler.has_ended())
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &stale {
            if let Some(handler) = sessions.get(session_id) {
                handler.stop().await;
            }
            sessions.remove(session_id);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), active = sessions.len(), "Removed stale sessions.");
        }
        stale.len()
    }

    /// Stops and removes all sessions.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, handler) in sessions.drain() {
            handler.stop().await;
        }
        info!("All sessions stopped.");
    }
}
