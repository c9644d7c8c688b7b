//! Manages the WebSocket connection lifecycle for a voice session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{audio_utils::ClientAudioResampler, state::AppState};
use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use voice_proxy_core::{
    ConnectionState, SessionError, SessionEvent, SessionEvents, SessionHandler,
    UPSTREAM_PCM16_SAMPLE_RATE, VoiceSessionConfig,
};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Parameters taken from the client's `init` message.
struct InitRequest {
    config: VoiceSessionConfig,
    sample_rate: u32,
}

/// Main handler for an individual WebSocket connection.
///
/// Waits for `init`, registers and starts a session, bridges the socket to
/// it until either side ends, then removes the session.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting initialization...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be an `init` message.
    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text, &state),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        Some(Err(e)) => {
            warn!(error = ?e, "Client socket failed before init.");
            return;
        }
        None => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let init = match init {
        Ok(init) => init,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(&mut socket_tx, ServerMessage::Error { message: e.to_string() }).await;
            return;
        }
    };

    let session_id = init.config.session_id.clone();
    tracing::Span::current().record("session_id", session_id.as_str());

    let (handler, events) = match state.sessions.create_session(init.config).await {
        Ok(created) => created,
        Err(e) => {
            warn!(error = %e, "Session rejected.");
            let _ = send_msg(&mut socket_tx, ServerMessage::Error { message: e.to_string() }).await;
            return;
        }
    };

    if let Err(e) = handler.start().await {
        error!(error = %e, "Failed to start voice session.");
        let _ = send_msg(&mut socket_tx, ServerMessage::Error { message: e.to_string() }).await;
        state.sessions.remove_session(&session_id).await;
        return;
    }

    if send_msg(
        &mut socket_tx,
        ServerMessage::Initialized {
            session_id: session_id.clone(),
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
        state.sessions.remove_session(&session_id).await;
        return;
    }

    if let Err(e) = run_voice_session(&handler, events, socket_tx, socket_rx, init.sample_rate).await {
        error!(error = ?e, "Voice session terminated with error.");
    }
    state.sessions.remove_session(&session_id).await;
    info!("WebSocket connection closed and voice session removed.");
}

/// Parses the `init` message into a session configuration.
fn parse_init(init_text: &str, state: &AppState) -> Result<InitRequest> {
    let init_msg: ClientMessage = serde_json::from_str(init_text).context("Invalid `init` message")?;
    let ClientMessage::Init {
        user_id,
        conversation_id,
        sample_rate,
        instructions,
        tool_categories,
    } = init_msg
    else {
        return Err(anyhow!("First message must be `init`"));
    };

    let mut config = state.config.voice_session(&user_id, &conversation_id);
    config.instructions = instructions;
    config.tool_categories = tool_categories;
    Ok(InitRequest {
        config,
        sample_rate: sample_rate.unwrap_or(UPSTREAM_PCM16_SAMPLE_RATE),
    })
}

/// Bridges an initialized client socket and its session until either side ends.
async fn run_voice_session(
    handler: &SessionHandler,
    mut events: SessionEvents,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    sample_rate: u32,
) -> Result<()> {
    let mut resampler = if sample_rate == UPSTREAM_PCM16_SAMPLE_RATE {
        None
    } else {
        info!(sample_rate, "Resampling client audio to the upstream rate.");
        Some(ClientAudioResampler::new(sample_rate)?)
    };

    loop {
        tokio::select! {
            // Handle messages from the client WebSocket.
            msg_result = socket_rx.next() => {
                let Some(msg_result) = msg_result else {
                    info!("Client socket closed.");
                    break;
                };
                match msg_result {
                    Ok(Message::Binary(data)) => {
                        let pcm = match resampler.as_mut() {
                            Some(resampler) => resampler.process(&data)?,
                            None => data.to_vec(),
                        };
                        if let Err(e) = handler.send_audio(&pcm) {
                            warn!(error = %e, "Dropping client audio.");
                            if matches!(e, SessionError::NotRunning) {
                                break;
                            }
                        }
                    }
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::UserText { text }) => {
                            if let Err(e) = handler.send_text(&text).await {
                                send_msg(&mut socket_tx, ServerMessage::Error { message: e.to_string() }).await?;
                            }
                        }
                        Ok(ClientMessage::CancelResponse) => {
                            let cancelled = handler.cancel_response().await;
                            debug!(cancelled, "Client requested cancellation.");
                        }
                        Ok(ClientMessage::Stop) => {
                            info!("Client requested stop.");
                            break;
                        }
                        Ok(ClientMessage::Init { .. }) => warn!("Ignoring repeated `init` message."),
                        Err(e) => warn!(error = %e, "Ignoring malformed client message."),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame. Shutting down session.");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(e) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                }
            },
            // Forward session notifications to the client.
            event = events.recv() => {
                let Some(event) = event else { break };
                let ended = matches!(
                    event,
                    SessionEvent::StateChange(ConnectionState::Disconnected | ConnectionState::Error)
                );
                send_msg(&mut socket_tx, ServerMessage::from(event)).await?;
                if ended {
                    info!("Voice session ended upstream.");
                    break;
                }
            },
        }
    }

    let _ = socket_tx.close().await;
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use secrecy::SecretString;
    use std::time::Duration;
    use voice_proxy_core::{DefaultSessionFactory, NoTools, SessionManager, WebSocketConnector};

    fn app_state() -> AppState {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            openai_api_key: SecretString::from("test-key".to_string()),
            realtime_url: WebSocketConnector::DEFAULT_URL.to_string(),
            realtime_model: "gpt-4o-realtime-preview".to_string(),
            realtime_voice: "sage".to_string(),
            max_sessions: 4,
            session_max_age: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            idle_timeout_sec: 120,
            barge_in_enabled: true,
            mcp_server_command: None,
            log_level: tracing::Level::INFO,
        };
        let connector = Arc::new(WebSocketConnector::new(
            config.realtime_url.clone(),
            config.openai_api_key.clone(),
        ));
        let factory = Arc::new(DefaultSessionFactory::new(connector, Arc::new(NoTools)));
        AppState {
            sessions: Arc::new(SessionManager::new(config.max_sessions, factory)),
            config: Arc::new(config),
        }
    }

    #[test]
    fn test_parse_init_applies_service_settings() {
        let state = app_state();
        let init = parse_init(
            r#"{"type":"init","user_id":"u1","conversation_id":"c1","sample_rate":16000,"tool_categories":["calendar"],"instructions":"Be brief."}"#,
            &state,
        )
        .unwrap();

        assert_eq!(init.sample_rate, 16000);
        assert_eq!(init.config.user_id, "u1");
        assert_eq!(init.config.conversation_id, "c1");
        assert_eq!(init.config.voice, "sage");
        assert_eq!(init.config.idle_timeout_sec, 120);
        assert_eq!(init.config.tool_categories, vec!["calendar".to_string()]);
        assert_eq!(init.config.instructions.as_deref(), Some("Be brief."));
        assert!(!init.config.session_id.is_empty());
    }

    #[test]
    fn test_parse_init_defaults_to_upstream_rate() {
        let state = app_state();
        let init = parse_init(r#"{"type":"init","user_id":"u1","conversation_id":"c1"}"#, &state).unwrap();
        assert_eq!(init.sample_rate, UPSTREAM_PCM16_SAMPLE_RATE);
    }

    #[test]
    fn test_parse_init_rejects_other_messages() {
        let state = app_state();
        assert!(parse_init(r#"{"type":"stop"}"#, &state).is_err());
        assert!(parse_init("hello", &state).is_err());
    }
}
