//! # MCP Storage Server
//!
//! An MCP gateway that exposes read-only PostgreSQL and MySQL access as tools over HTTP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_storage_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), McpServerError> {
//!     let adapters = Arc::new(AdapterRegistry::new());
//!     adapters
//!         .register(Arc::new(PostgresAdapter::new(Some("postgres://localhost/app".into()))))
//!         .await?;
//!
//!     let tools = Arc::new(ToolRegistry::new());
//!     register_builtin_tools(&tools, &adapters)?;
//!
//!     let server = McpServer::builder()
//!         .transport(TransportMode::Session)
//!         .tools(tools)
//!         .adapters(adapters)
//!         .build()?;
//!     server.run().await
//! }
//! ```

pub mod adapters;
pub mod builder;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod tool;
pub mod tools;

pub use adapters::{AdapterError, AdapterRegistry, DatabaseAdapter, MySqlAdapter, PostgresAdapter};
pub use builder::McpServerBuilder;
pub use config::Args;
pub use server::McpServer;
pub use tool::{FnTool, McpTool, ToolContext, ToolRegistry};
pub use tools::register_builtin_tools;

pub use mcp_storage_http::{ServerConfig, TransportMode};
pub use mcp_storage_protocol::{McpError, McpResult};

/// Common imports for building a server
pub mod prelude {
    pub use crate::{
        AdapterRegistry, DatabaseAdapter, FnTool, McpServer, McpServerError, McpTool,
        MySqlAdapter, PostgresAdapter, ToolContext, ToolRegistry, TransportMode,
        register_builtin_tools,
    };
    pub use mcp_storage_protocol::{CallToolResult, McpResult, PropertySchema, Tool, ToolSchema};
}

/// Result type for server startup and shutdown
pub type Result<T> = std::result::Result<T, McpServerError>;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] mcp_storage_http::HttpMcpError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("no database adapter connected")]
    NoAdapters,

    #[error("Server task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
