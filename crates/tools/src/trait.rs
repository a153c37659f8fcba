//! Tool abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use mathprompt_core::SessionId;
use mathprompt_eval::EvalError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Errors from running a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The agent sent arguments that do not match the schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No tool with that name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The evaluation behind the tool failed.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// A tool the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get tool name.
    fn name(&self) -> &str;

    /// Get tool description.
    fn description(&self) -> &str;

    /// Get tool schema (for agent discovery).
    fn schema(&self) -> ToolSchema;

    /// Execute the tool on the agent's JSON arguments. The returned text is
    /// sent back to the agent verbatim.
    async fn execute(&self, input: &Value, session: SessionId) -> Result<String, ToolError>;
}

/// Tool schema for agent discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name
    pub name: String,

    /// Description
    pub description: String,

    /// Parameters
    pub parameters: Vec<Parameter>,
}

impl ToolSchema {
    /// JSON Schema object describing the arguments.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                json!({ "type": p.param_type, "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,

    /// Description
    pub description: String,

    /// JSON type
    pub param_type: String,

    /// Required
    pub required: bool,
}

impl Parameter {
    /// A required string parameter.
    pub fn required_string(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            param_type: "string".to_string(),
            required: true,
        }
    }
}

/// The set of tools offered in a session, looked up by name.
#[derive(Clone, Default)]
pub struct Toolbox {
    tools: Vec<Arc<dyn Tool>>,
}

impl Toolbox {
    /// Empty toolbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Schemas of every tool, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    /// Run the named tool.
    pub async fn execute(&self, name: &str, input: &Value, session: SessionId) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(input, session).await
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether there are no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
