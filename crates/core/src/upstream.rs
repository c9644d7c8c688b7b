//! Transport to the upstream real-time endpoint.
//!
//! The session only sees a sink and a stream of JSON text frames, so the
//! WebSocket client can be swapped for an in-memory pair in tests.

use crate::config::VoiceSessionConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use secrecy::{ExposeSecret, SecretString};
use std::pin::Pin;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info};

pub type UpstreamSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established upstream connection, split into its two directions.
pub struct UpstreamConnection {
    pub sink: UpstreamSink,
    pub stream: UpstreamStream,
}

impl UpstreamConnection {
    pub fn new<S, T>(sink: S, stream: T) -> Self
    where
        S: Sink<String, Error = anyhow::Error> + Send + 'static,
        T: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens upstream connections for sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, config: &VoiceSessionConfig) -> Result<UpstreamConnection>;
}

/// Connects to an OpenAI-compatible real-time WebSocket endpoint.
pub struct WebSocketConnector {
    url: String,
    api_key: SecretString,
}

impl WebSocketConnector {
    pub const DEFAULT_URL: &'static str = "wss://api.openai.com/v1/realtime";

    pub fn new(url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        if self.url.contains('?') {
            format!("{}&model={}", self.url, model)
        } else {
            format!("{}?model={}", self.url, model)
        }
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self, config: &VoiceSessionConfig) -> Result<UpstreamConnection> {
        let mut request = self.endpoint(&config.model).into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key.expose_secret()).parse()?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to upstream real-time WebSocket")?;
        info!(session_id = %config.session_id, model = %config.model, "Connected to upstream.");

        let (ws_tx, ws_rx) = ws_stream.split();
        let sink = ws_tx
            .sink_map_err(anyhow::Error::from)
            .with(|text: String| future::ready(Ok::<_, anyhow::Error>(WsMessage::Text(text.into()))));
        let stream = ws_rx.filter_map(|frame| {
            future::ready(match frame {
                Ok(WsMessage::Text(text)) => Some(Ok(text.to_string())),
                Ok(WsMessage::Close(close_frame)) => {
                    debug!(?close_frame, "Upstream sent close frame.");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        });

        Ok(UpstreamConnection::new(sink, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_model() {
        let connector = WebSocketConnector::new(
            WebSocketConnector::DEFAULT_URL,
            SecretString::from("sk-test".to_string()),
        );
        assert_eq!(
            connector.endpoint("gpt-4o-realtime-preview"),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );

        let connector = WebSocketConnector::new("wss://example.test/rt?v=1", SecretString::from("k".to_string()));
        assert_eq!(connector.endpoint("m"), "wss://example.test/rt?v=1&model=m");
    }
}
