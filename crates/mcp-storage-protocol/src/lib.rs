//! # Model Context Protocol (2024-11-05) types
//!
//! The subset of MCP the storage gateway speaks: the initialize handshake, tool listing and
//! tool calls, plus the error type every method handler returns.

pub mod initialize;
pub mod notifications;
pub mod tools;

pub use initialize::{
    ClientCapabilities, Implementation, InitializeRequest, InitializeResult, ServerCapabilities,
    ToolsCapabilities,
};
pub use notifications::ProgressNotificationParams;
pub use tools::{
    CallToolRequest, CallToolResult, ContentItem, ListToolsResult, PropertySchema, Tool,
    ToolSchema,
};

use mcp_storage_json_rpc::{JsonRpcErrorObject, ToJsonRpcError};
use serde_json::Value;

/// The only protocol version this server negotiates
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol method names
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PROGRESS: &str = "notifications/progress";

    /// Methods that do not need a negotiated session
    pub fn allowed_before_initialize(method: &str) -> bool {
        method == INITIALIZE || method.starts_with("notifications/")
    }
}

/// Common result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// MCP-specific errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Unsupported protocol version: server supports {expected}, client requested {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("{0}")]
    ToolExecutionError(String),

    #[error("Session not initialized")]
    SessionNotInitialized,

    #[error("Invalid or expired session: {0}")]
    InvalidSession(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<String> for McpError {
    fn from(message: String) -> Self {
        Self::ToolExecutionError(message)
    }
}

impl From<&str> for McpError {
    fn from(message: &str) -> Self {
        Self::ToolExecutionError(message.to_string())
    }
}

impl McpError {
    pub fn missing_param(param: &str) -> Self {
        Self::MissingParameter(param.to_string())
    }

    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::ToolExecutionError(message.into())
    }

    /// Convert to a JsonRpcErrorObject for JSON-RPC 2.0 responses
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            McpError::VersionMismatch { expected, actual } => JsonRpcErrorObject::invalid_params(
                "Unsupported protocol version",
                Some(Value::String(format!(
                    "Server supports {}, client requested {}",
                    expected, actual
                ))),
            ),
            McpError::InvalidParameters(detail) => JsonRpcErrorObject::invalid_params(
                "Invalid parameters",
                Some(Value::String(detail.clone())),
            ),
            McpError::MissingParameter(param) => JsonRpcErrorObject::invalid_params(
                "Invalid parameters",
                Some(Value::String(format!("Missing required parameter: {}", param))),
            ),
            McpError::ToolNotFound(name) => {
                JsonRpcErrorObject::invalid_params(&format!("Tool not found: {}", name), None)
            }
            McpError::SessionNotInitialized => JsonRpcErrorObject::invalid_request(Some(
                Value::String("Session not initialized".to_string()),
            )),
            McpError::InvalidSession(_) => JsonRpcErrorObject::invalid_request(Some(
                Value::String("Invalid or expired session".to_string()),
            )),
            other => JsonRpcErrorObject::internal_error(Some(other.to_string())),
        }
    }
}

impl ToJsonRpcError for McpError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        McpError::to_error_object(self)
    }
}
