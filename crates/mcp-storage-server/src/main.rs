//! mcp-storage binary
//!
//! Connects the configured database adapters, registers the built-in tools and serves
//! MCP over HTTP until ctrl-c or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use mcp_storage_server::{
    AdapterRegistry, Args, DatabaseAdapter, McpServer, McpServerError, MySqlAdapter,
    PostgresAdapter, ToolRegistry, logging, register_builtin_tools,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.effective_log_level());

    let config = args.to_server_config().context("invalid configuration")?;
    info!(
        bind_address = %config.bind_address,
        transport = %config.transport,
        "Configuration loaded"
    );

    let adapters = Arc::new(AdapterRegistry::new());
    let candidates: Vec<Arc<dyn DatabaseAdapter>> = vec![
        Arc::new(PostgresAdapter::new(args.postgres_url.clone())),
        Arc::new(MySqlAdapter::new(args.mysql_dsn.clone())),
    ];
    for adapter in candidates {
        let name = adapter.name();
        match adapters.register(adapter).await {
            Ok(true) => {}
            Ok(false) => info!(adapter = name, "Adapter not configured, skipping"),
            Err(e) => error!(adapter = name, "Failed to register adapter: {}", e),
        }
    }

    if adapters.is_empty() {
        if args.require_adapter {
            return Err(McpServerError::NoAdapters).context("MCP_REQUIRE_ADAPTER is set");
        }
        warn!("No database adapters configured. Only built-in tools will be available.");
    }

    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools, &adapters).context("failed to register tools")?;

    let server = McpServer::builder()
        .config(config)
        .tools(tools)
        .adapters(adapters)
        .build()
        .context("failed to build server")?;

    server.run().await.context("server error")?;
    Ok(())
}
