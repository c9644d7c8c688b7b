//! Runs function calls requested by upstream and returns their output.

use super::SessionHandler;
use crate::{
    error::SessionError,
    tools::{ToolContext, ToolResult},
};
use serde_json::{Value, json};
use tracing::{Instrument, info, warn};
use voice_realtime_types::{ClientEvent, Item};

impl SessionHandler {
    /// Executes the call and always answers upstream, then asks for the
    /// follow-up response. Failures of any kind become a failure payload.
    pub(super) async fn handle_function_call(&self, call_id: String, name: String, arguments: String) {
        let announced = self.inner.pending_calls.lock().remove(&call_id);
        let name = if name.is_empty() {
            announced.unwrap_or_default()
        } else {
            name
        };
        self.inner.state.lock().metrics.tool_call_count += 1;
        info!(tool = %name, %call_id, "Executing tool call.");

        let payload = match serde_json::from_str::<Value>(&arguments) {
            Ok(args) => self.run_tool(&name, args).await,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call arguments are not valid JSON.");
                json!({"success": false, "error": format!("Invalid arguments: {e}")})
            }
        };

        let output = ClientEvent::ConversationItemCreate {
            item: Item::FunctionCallOutput {
                call_id: call_id.clone(),
                output: payload.to_string(),
            },
        };
        if let Err(e) = self.send_event(output).await {
            warn!(tool = %name, %call_id, error = ?e, "Failed to send tool output.");
            return;
        }
        if let Err(e) = self.send_event(ClientEvent::ResponseCreate { response: None }).await {
            warn!(tool = %name, %call_id, error = ?e, "Failed to request follow-up response.");
        }
    }

    async fn run_tool(&self, name: &str, args: Value) -> Value {
        let config = &self.inner.config;
        let ctx = ToolContext {
            user_id: config.user_id.clone(),
            session_id: config.session_id.clone(),
            conversation_id: config.conversation_id.clone(),
            mode: "voice".to_string(),
        };

        // Spawned so that a panicking tool cannot take the receiver down.
        let executor = self.inner.tool_executor.clone();
        let tool = name.to_string();
        let mut handle = tokio::spawn(
            async move { executor.execute(&tool, args, &ctx).await }.in_current_span(),
        );

        let result = match tokio::time::timeout(config.response_timeout(), &mut handle).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => self.tool_failure(name, format!("{e:#}")),
            Ok(Err(join_error)) => self.tool_failure(name, format!("tool task failed: {join_error}")),
            Err(_) => {
                handle.abort();
                self.tool_failure(
                    name,
                    format!("timed out after {}s", config.response_timeout_sec),
                )
            }
        };
        result.to_payload()
    }

    fn tool_failure(&self, name: &str, message: String) -> ToolResult {
        let err = SessionError::ToolExecution {
            name: name.to_string(),
            message,
        };
        warn!(error = %err, "Tool execution failed.");
        ToolResult::failure(err.to_string())
    }
}
