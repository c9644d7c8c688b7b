use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;
use voice_proxy_core::{VoiceSessionConfig, WebSocketConnector};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub max_sessions: usize,
    /// Sessions older than this are reclaimed by the periodic sweep.
    pub session_max_age: Duration,
    pub cleanup_interval: Duration,
    pub idle_timeout_sec: u64,
    pub barge_in_enabled: bool,
    /// Command line of an MCP server to spawn for tool calls.
    pub mcp_server_command: Option<String>,
    pub log_level: Level,
}

/// Reads `name`, falling back to `default` when unset, and parses it.
fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

/// Like [`parse_var`] but rejects zero.
fn parse_positive(name: &str, default: &str) -> Result<u64, ConfigError> {
    let value: u64 = parse_var(name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:3000")?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url = std::env::var("REALTIME_URL")
            .unwrap_or_else(|_| WebSocketConnector::DEFAULT_URL.to_string());
        let defaults = VoiceSessionConfig::default();
        let realtime_model = std::env::var("REALTIME_MODEL").unwrap_or(defaults.model);
        let realtime_voice = std::env::var("REALTIME_VOICE").unwrap_or(defaults.voice);

        let max_sessions = parse_positive("MAX_SESSIONS", "100")? as usize;
        let session_max_age = Duration::from_secs(parse_positive("SESSION_MAX_AGE_SECS", "3600")?);
        let cleanup_interval = Duration::from_secs(parse_positive("CLEANUP_INTERVAL_SECS", "60")?);
        let idle_timeout_sec = parse_positive("IDLE_TIMEOUT_SECS", &defaults.idle_timeout_sec.to_string())?;
        let barge_in_enabled = parse_var::<bool>("BARGE_IN_ENABLED", "true")?;

        let mcp_server_command = std::env::var("MCP_SERVER_COMMAND")
            .ok()
            .filter(|command| !command.trim().is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_url,
            realtime_model,
            realtime_voice,
            max_sessions,
            session_max_age,
            cleanup_interval,
            idle_timeout_sec,
            barge_in_enabled,
            mcp_server_command,
            log_level,
        })
    }

    /// Session parameters for a new client, with service-wide settings applied.
    pub fn voice_session(&self, user_id: &str, conversation_id: &str) -> VoiceSessionConfig {
        VoiceSessionConfig {
            model: self.realtime_model.clone(),
            voice: self.realtime_voice.clone(),
            idle_timeout_sec: self.idle_timeout_sec,
            barge_in_enabled: self.barge_in_enabled,
            ..VoiceSessionConfig::new(user_id, conversation_id)
        }
    }
}
