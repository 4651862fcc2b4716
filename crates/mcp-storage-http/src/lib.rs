//! # HTTP MCP Server
//!
//! HTTP transport for the MCP storage gateway, built directly on hyper 1.
//!
//! ## Supported Transports
//! - **Stateless POST**: every `POST /` carries one envelope or batch, answered inline
//! - **Session POST**: `initialize` hands out an `Mcp-Session-Id`, later calls must present it
//! - **HTTP+SSE**: `GET /sse` opens a push channel, `POST /message?sessionId=` feeds it
//!
//! ## Features
//! - CORS headers and preflight handling for browser-based clients
//! - `GET /health` liveness probe
//! - OAuth discovery stubs for clients that probe for an authorization server
//! - Graceful shutdown with a bounded drain period

pub mod cors;
pub mod json_rpc_responses;
pub mod oauth;
pub mod protocol;
pub mod server;
pub mod session_handler;
pub mod sse;
pub mod stream_manager;

// Re-export main types
pub use cors::CorsLayer;
pub use protocol::{extract_query_session_id, extract_session_id};
pub use server::{HttpMcpServer, HttpMcpServerBuilder, ServerConfig, TransportMode};
pub use session_handler::SessionMcpHandler;
pub use sse::SseEvent;
pub use stream_manager::{SendOutcome, StreamConfig, StreamManager};

// Re-export foundational types
pub use mcp_storage_json_rpc::{JsonRpcDispatcher, JsonRpcHandler};

/// Result type for HTTP MCP operations
pub type Result<T> = std::result::Result<T, HttpMcpError>;

/// HTTP MCP specific errors
#[derive(Debug, thiserror::Error)]
pub enum HttpMcpError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] mcp_storage_json_rpc::JsonRpcTransportError),

    #[error("Session storage error: {0}")]
    Session(#[from] mcp_storage_session::SessionStorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
