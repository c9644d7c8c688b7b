//! Tool execution capability consumed by the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use voice_realtime_types::ToolDefinition;

/// Who is calling a tool and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    pub user_id: String,
    pub session_id: String,
    pub conversation_id: String,
    /// Interaction mode. Always `"voice"` for calls made by a voice session.
    pub mode: String,
}

/// Outcome of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    /// Human-readable summary the model can speak back.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub needs_connection: bool,
    #[serde(default)]
    pub available_calendars: Option<Vec<String>>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The JSON payload sent back upstream as the function call output.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("success".to_string(), json!(self.success));
        if self.success {
            payload.insert("data".to_string(), self.data.clone().unwrap_or(Value::Null));
        } else {
            let error = self
                .error
                .clone()
                .unwrap_or_else(|| "Tool execution failed".to_string());
            payload.insert("error".to_string(), json!(error));
            if self.needs_clarification {
                payload.insert("needs_clarification".to_string(), json!(true));
            }
            if self.needs_connection {
                payload.insert("needs_connection".to_string(), json!(true));
            }
            if let Some(calendars) = &self.available_calendars {
                payload.insert("available_calendars".to_string(), json!(calendars));
            }
        }
        if let Some(message) = &self.message {
            payload.insert("message".to_string(), json!(message));
        }
        Value::Object(payload)
    }
}

/// Description of a tool advertised to upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
    #[serde(default)]
    pub category: Option<String>,
}

impl ToolSchema {
    /// Whether the tool belongs to one of `categories`. An empty list admits every tool.
    pub fn in_categories(&self, categories: &[String]) -> bool {
        categories.is_empty()
            || self
                .category
                .as_ref()
                .is_some_and(|category| categories.iter().any(|c| c == category))
    }
}

impl From<ToolSchema> for ToolDefinition {
    fn from(schema: ToolSchema) -> Self {
        ToolDefinition::function(schema.name, schema.description, schema.parameters)
    }
}

/// Executes function calls requested by the upstream model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs the tool `name`. An `Err` is treated like a failed result.
    async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;

    /// Tools to advertise when the session is configured.
    async fn list_tool_schemas(&self) -> anyhow::Result<Vec<ToolSchema>>;
}

/// A [`ToolExecutor`] with no tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn execute(&self, name: &str, _args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::failure(format!("Unknown tool: {name}")))
    }

    async fn list_tool_schemas(&self) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(Vec::new())
    }
}
