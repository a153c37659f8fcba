//! The optimizing agent side: conversation types, the agent transport and its
//! error classes, the per-session state machine, and an MCP server exposing
//! the same tool to external agent runtimes.

#![warn(missing_docs)]

pub mod message;
pub mod client;
pub mod anthropic;
pub mod prompts;
pub mod session;
pub mod mcp_server;

pub use message::{AgentRequest, AgentResponse, ContentBlock, Message, Role, StopReason};
pub use client::{AgentClient, AgentError, ErrorClass, FatalReason};
pub use anthropic::AnthropicClient;
pub use session::{SessionConfig, SessionError, SessionFailure, SessionOutcome, SessionRunner};
pub use mcp_server::{McpServeError, McpServer, MCP_VERSION};
