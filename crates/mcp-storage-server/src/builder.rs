//! MCP Server Builder
//!
//! Wires the lifecycle and tool handlers into an [`HttpMcpServer`].

use std::sync::Arc;

use tracing::debug;

use mcp_storage_http::{HttpMcpServer, ServerConfig, TransportMode};
use mcp_storage_json_rpc::JsonRpcHandler;
use mcp_storage_protocol::Implementation;
use mcp_storage_session::{BoxedSessionStorage, InMemorySessionStorage};

use crate::adapters::AdapterRegistry;
use crate::handlers::{
    CallToolHandler, InitializeHandler, InitializedNotificationHandler, ListToolsHandler,
    PingHandler,
};
use crate::server::McpServer;
use crate::tool::ToolRegistry;
use crate::Result;

pub const DEFAULT_SERVER_NAME: &str = "MCP Storage Server";
pub const DEFAULT_SERVER_VERSION: &str = "1.0.0";

/// Builder for [`McpServer`]
pub struct McpServerBuilder {
    name: String,
    version: String,
    config: ServerConfig,
    tools: Arc<ToolRegistry>,
    adapters: Arc<AdapterRegistry>,
    session_storage: Option<Arc<BoxedSessionStorage>>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            version: DEFAULT_SERVER_VERSION.to_string(),
            config: ServerConfig::default(),
            tools: Arc::new(ToolRegistry::new()),
            adapters: Arc::new(AdapterRegistry::new()),
            session_storage: None,
        }
    }

    /// Server name reported in `serverInfo`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: TransportMode) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Adapters closed by [`McpServer::run`] at shutdown
    pub fn adapters(mut self, adapters: Arc<AdapterRegistry>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Session storage; defaults to an in-memory store expiring after the configured TTL
    pub fn session_storage(mut self, storage: Arc<BoxedSessionStorage>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    pub fn build(self) -> Result<McpServer> {
        let implementation = Implementation::new(self.name, self.version);
        let storage: Arc<BoxedSessionStorage> = match self.session_storage {
            Some(storage) => storage,
            None => Arc::new(InMemorySessionStorage::with_ttl(self.config.session_ttl)),
        };

        let initialize = InitializeHandler::new(implementation.clone(), Some(Arc::clone(&storage)));
        let list_tools = ListToolsHandler::new(Arc::clone(&self.tools));
        let call_tool = CallToolHandler::new(Arc::clone(&self.tools));

        debug!(
            transport = %self.config.transport,
            tools = self.tools.len(),
            "Registering MCP handlers"
        );
        let http = HttpMcpServer::builder_with_storage(storage)
            .config(self.config)
            .register_handler(initialize.supported_methods(), initialize)
            .register_handler(
                InitializedNotificationHandler.supported_methods(),
                InitializedNotificationHandler,
            )
            .register_handler(PingHandler.supported_methods(), PingHandler)
            .register_handler(list_tools.supported_methods(), list_tools)
            .register_handler(call_tool.supported_methods(), call_tool)
            .build()?;

        Ok(McpServer::new(implementation, http, self.tools, self.adapters))
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
