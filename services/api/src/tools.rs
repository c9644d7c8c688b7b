//! Tool execution over the Model Context Protocol.
//!
//! Function calls requested by the upstream model are forwarded to an MCP
//! server, and its tool list is what the session advertises.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
    transport::TokioChildProcess,
};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, instrument};
use voice_proxy_core::{ToolContext, ToolExecutor, ToolResult, ToolSchema};

/// A [`ToolExecutor`] backed by a running MCP client.
pub struct McpToolExecutor {
    client: RunningService<RoleClient, ()>,
    /// Category attached to every tool this server provides.
    category: Option<String>,
}

impl McpToolExecutor {
    pub fn new(client: RunningService<RoleClient, ()>) -> Self {
        Self {
            client,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Spawns the MCP server described by `command_line` and talks to it
    /// over stdio.
    pub async fn spawn(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().context("MCP server command is empty")?;
        let mut command = Command::new(program);
        command.args(parts);

        let transport = TokioChildProcess::new(command)
            .with_context(|| format!("Failed to spawn MCP server '{program}'"))?;
        let client = ()
            .serve(transport)
            .await
            .context("Failed to initialize MCP client")?;
        info!(%program, "Connected to MCP tool server.");
        Ok(Self::new(client))
    }
}

/// Interprets the text an MCP tool returned.
///
/// Text that already has the shape of a [`ToolResult`] is taken as is; other
/// JSON becomes the result data, and plain text is passed through as data.
fn tool_result_from_text(text: String, is_error: bool) -> ToolResult {
    if is_error {
        return ToolResult::failure(text);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) if value.get("success").is_some_and(Value::is_boolean) => {
            serde_json::from_value(value.clone()).unwrap_or_else(|_| ToolResult::ok(value))
        }
        Ok(value) => ToolResult::ok(value),
        Err(_) => ToolResult::ok(Value::String(text)),
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    #[instrument(skip(self, args), fields(session_id = %ctx.session_id, user_id = %ctx.user_id))]
    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => bail!("Tool arguments must be a JSON object, got {other}"),
        };

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .with_context(|| format!("MCP call to '{name}' failed"))?;

        let text = result
            .content
            .context("Tool call returned no content")?
            .into_iter()
            .filter_map(|content| match content.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        debug!(tool = %name, bytes = text.len(), "MCP tool returned.");

        Ok(tool_result_from_text(text, result.is_error.unwrap_or(false)))
    }

    async fn list_tool_schemas(&self) -> Result<Vec<ToolSchema>> {
        self.client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(ToolSchema {
                    name: t.name.to_string(),
                    description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                    parameters: serde_json::to_value(&*t.input_schema)?,
                    category: self.category.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::{
        ServerHandler,
        handler::server::{router::tool::ToolRouter, tool::Parameters},
        model::{ServerCapabilities, ServerInfo},
        tool, tool_handler, tool_router,
    };
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema, Debug)]
    struct CreateEventArgs {
        #[schemars(description = "Title of the calendar event")]
        title: String,
    }

    struct CalendarServer {
        tool_router: ToolRouter<Self>,
    }

    #[tool_handler]
    impl ServerHandler for CalendarServer {
        fn get_info(&self) -> ServerInfo {
            ServerInfo {
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                ..Default::default()
            }
        }
    }

    #[tool_router]
    impl CalendarServer {
        fn new() -> Self {
            Self {
                tool_router: Self::tool_router(),
            }
        }

        #[tool(description = "List today's calendar events.")]
        async fn list_events(&self) -> Result<String, String> {
            Ok(json!({"events": ["standup", "review"]}).to_string())
        }

        #[tool(description = "Create a calendar event.")]
        async fn create_event(&self, args: Parameters<CreateEventArgs>) -> Result<String, String> {
            if args.0.title.trim().is_empty() {
                return Err("An event needs a title.".to_string());
            }
            Ok(json!({
                "success": true,
                "data": {"title": args.0.title},
                "message": "Event created.",
            })
            .to_string())
        }
    }

    async fn connected_executor() -> McpToolExecutor {
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            if let Ok(service) = CalendarServer::new().serve(server_transport).await {
                let _ = service.waiting().await;
            }
        });
        let client = ().serve(client_transport).await.unwrap();
        McpToolExecutor::new(client).with_category("calendar")
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            conversation_id: "conv-1".to_string(),
            mode: "voice".to_string(),
        }
    }

    #[test]
    fn test_tool_result_from_text() {
        let result = tool_result_from_text(r#"{"success":false,"error":"No calendar","needs_connection":true}"#.to_string(), false);
        assert!(!result.success);
        assert!(result.needs_connection);

        let result = tool_result_from_text(r#"{"events":[]}"#.to_string(), false);
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"events": []})));

        let result = tool_result_from_text("done".to_string(), false);
        assert_eq!(result.data, Some(json!("done")));

        let result = tool_result_from_text("boom".to_string(), true);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_lists_tools_with_category() {
        let executor = connected_executor().await;
        let mut schemas = executor.list_tool_schemas().await.unwrap();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["create_event", "list_events"]);
        assert!(schemas.iter().all(|s| s.category.as_deref() == Some("calendar")));
        assert_eq!(schemas[0].description, "Create a calendar event.");
        assert!(schemas[0].parameters["properties"].get("title").is_some());
    }

    #[tokio::test]
    async fn test_executes_tools() {
        let executor = connected_executor().await;

        let result = executor.execute("list_events", json!({}), &ctx()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"events": ["standup", "review"]})));

        let result = executor
            .execute("create_event", json!({"title": "Standup"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result.message.as_deref(), Some("Event created."));
        assert_eq!(result.data, Some(json!({"title": "Standup"})));

        let result = executor
            .execute("create_event", json!({"title": " "}), &ctx())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("An event needs a title."));
    }

    #[tokio::test]
    async fn test_rejects_non_object_arguments() {
        let executor = connected_executor().await;
        let err = executor.execute("list_events", json!([1, 2]), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
