//! MCP server exposing `evaluate_prompt` to external agent runtimes.
//!
//! JSON-RPC 2.0, one message per line over stdio. Supported methods:
//! `initialize`, `tools/list`, `tools/call` and `ping`. Notifications get no
//! reply. A failed log write stops the server.

use mathprompt_core::SessionId;
use mathprompt_eval::EvalError;
use mathprompt_tools::{ToolError, Toolbox};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info};

/// MCP Protocol version
pub const MCP_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// Tool definition for MCP protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Input schema for the tool
    pub input_schema: Value,
}

/// Incoming JSON-RPC message.
#[derive(Debug, Clone, Deserialize)]
struct McpRequest {
    /// Absent for notifications
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// MCP Response message.
#[derive(Debug, Clone, Serialize)]
pub struct McpResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<McpError>,
}

impl McpResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// MCP Error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    /// JSON-RPC error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Why the server stopped serving.
#[derive(Debug, thiserror::Error)]
pub enum McpServeError {
    /// Transport failure on stdin/stdout.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An evaluation could not be logged.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// MCP server over a toolbox. Evaluations are tagged with one session id.
pub struct McpServer {
    toolbox: Toolbox,
    session: SessionId,
    server_name: String,
    version: String,
}

impl McpServer {
    /// Create a server for `toolbox`.
    pub fn new(toolbox: Toolbox, session: SessionId) -> Self {
        Self {
            toolbox,
            session,
            server_name: "maths-eval".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Tools as advertised over MCP.
    pub fn tools(&self) -> Vec<McpTool> {
        self.toolbox
            .schemas()
            .into_iter()
            .map(|schema| McpTool {
                input_schema: schema.input_schema(),
                name: schema.name,
                description: schema.description,
            })
            .collect()
    }

    /// Handle one raw line. Returns the serialized reply, if any, or the
    /// evaluation error that must stop the server.
    pub async fn handle_line(&self, line: &str) -> Result<Option<String>, EvalError> {
        let response = match serde_json::from_str::<McpRequest>(line) {
            Ok(request) => match self.handle_request(request).await? {
                Some(response) => response,
                None => return Ok(None),
            },
            Err(e) => {
                error!("Failed to parse request: {}", e);
                McpResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {}", e))
            }
        };
        Ok(Some(serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string())))
    }

    async fn handle_request(&self, request: McpRequest) -> Result<Option<McpResponse>, EvalError> {
        let Some(id) = request.id else {
            debug!("Notification: {}", request.method);
            return Ok(None);
        };

        let response = match request.method.as_str() {
            "initialize" => {
                let protocol_version = request
                    .params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(MCP_VERSION);
                debug!("MCP Initialize request - version: {}", protocol_version);
                McpResponse::result(
                    id,
                    json!({
                        "protocolVersion": protocol_version,
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": self.server_name,
                            "version": self.version
                        }
                    }),
                )
            }

            "tools/list" => McpResponse::result(id, json!({ "tools": self.tools() })),

            "tools/call" => {
                let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                    return Ok(Some(McpResponse::error(id, INVALID_PARAMS, "missing tool name")));
                };
                let arguments = request.params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                debug!("Tool call: {} with args: {}", name, arguments);
                McpResponse::result(id, self.call_tool(name, &arguments).await?)
            }

            "ping" => McpResponse::result(id, json!({})),

            other => McpResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        Ok(Some(response))
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, EvalError> {
        match self.toolbox.execute(name, arguments, self.session).await {
            Ok(text) => Ok(json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false
            })),
            Err(ToolError::Eval(e)) if e.is_fatal() => {
                error!("Tool {} could not log its result: {}", name, e);
                Err(e)
            }
            Err(e) => {
                error!("Tool {} failed: {}", name, e);
                Ok(json!({
                    "content": [{ "type": "text", "text": e.to_string() }],
                    "isError": true
                }))
            }
        }
    }

    /// Serve requests from `reader`, writing replies to `writer`, until EOF
    /// or a failed log write.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), McpServeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut writer = BufWriter::new(writer);

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = self.handle_line(&line).await? {
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Serve over stdin/stdout.
    pub async fn serve_stdio(&self) -> Result<(), McpServeError> {
        info!("Starting MCP server v{} (stdio, session {})", self.version, self.session);
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
        info!("MCP server stopped");
        Ok(())
    }
}
