//! Main Entrypoint for the Voice Proxy API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting the tool server, if one is configured.
//! 3. Building the session registry and its periodic sweeper.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use voice_proxy_api::{
    cleanup::spawn_session_sweeper, config::Config, router::create_router, state::AppState,
    tools::McpToolExecutor,
};
use voice_proxy_core::{
    DefaultSessionFactory, NoTools, SessionManager, ToolExecutor, WebSocketConnector,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C. Shutting down.");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let tool_executor: Arc<dyn ToolExecutor> = match &config.mcp_server_command {
        Some(command) => Arc::new(
            McpToolExecutor::spawn(command)
                .await
                .context("Failed to start MCP tool server")?,
        ),
        None => {
            info!("No MCP server configured. Sessions run without tools.");
            Arc::new(NoTools)
        }
    };
    let connector = Arc::new(WebSocketConnector::new(
        config.realtime_url.clone(),
        config.openai_api_key.clone(),
    ));
    let factory = Arc::new(DefaultSessionFactory::new(connector, tool_executor));
    let sessions = Arc::new(SessionManager::new(config.max_sessions, factory));
    let sweeper = spawn_session_sweeper(
        sessions.clone(),
        config.cleanup_interval,
        config.session_max_age,
    );

    let app_state = Arc::new(AppState {
        sessions: sessions.clone(),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.realtime_model,
        voice = %config.realtime_voice,
        max_sessions = config.max_sessions,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    sessions.shutdown().await;
    info!("Server has shut down.");
    Ok(())
}
