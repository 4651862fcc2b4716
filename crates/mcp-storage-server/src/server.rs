//! MCP Server
//!
//! Runs the HTTP transport until a shutdown signal, then closes the database adapters
//! and lets open connections drain.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use mcp_storage_http::HttpMcpServer;
use mcp_storage_protocol::Implementation;

use crate::adapters::AdapterRegistry;
use crate::builder::McpServerBuilder;
use crate::tool::ToolRegistry;
use crate::{McpServerError, Result};

/// A configured gateway: transport, tools and adapters
#[derive(Clone)]
pub struct McpServer {
    implementation: Implementation,
    http: HttpMcpServer,
    tools: Arc<ToolRegistry>,
    adapters: Arc<AdapterRegistry>,
}

impl McpServer {
    pub(crate) fn new(
        implementation: Implementation,
        http: HttpMcpServer,
        tools: Arc<ToolRegistry>,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            implementation,
            http,
            tools,
            adapters,
        }
    }

    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }

    pub fn http(&self) -> &HttpMcpServer {
        &self.http
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// Bind the configured address and run until ctrl-c or SIGTERM
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.http.config().bind_address).await?;
        self.run_with_listener(listener).await
    }

    /// Same as [`run`](Self::run) on an already bound listener
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Starting MCP server: {} v{}",
            self.implementation.name, self.implementation.version
        );
        info!(
            adapters = ?self.adapters.list(),
            tools = self.tools.len(),
            "Server ready"
        );

        let http = self.http.clone();
        let mut serve = tokio::spawn(async move { http.serve(listener).await });

        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
            }
            finished = &mut serve => {
                // The transport stopped without a signal; still release the pools
                self.close_adapters().await;
                return match finished {
                    Ok(result) => result.map_err(McpServerError::from),
                    Err(e) => Err(McpServerError::Task(e.to_string())),
                };
            }
        }

        self.http.shutdown();
        self.close_adapters().await;

        match serve.await {
            Ok(result) => result?,
            Err(e) => return Err(McpServerError::Task(e.to_string())),
        }
        info!("Server stopped");
        Ok(())
    }

    /// Serve on `listener` until [`shutdown`](Self::shutdown), without signal handling
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.http.serve(listener).await?;
        Ok(())
    }

    /// Stop the transport; every session and in-flight tool call is cancelled
    pub fn shutdown(&self) {
        self.http.shutdown();
    }

    async fn close_adapters(&self) {
        match self.adapters.close_all().await {
            Ok(()) => info!("Database adapters closed"),
            Err(e) => error!("Error closing adapters: {}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::StubAdapter;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = McpServer::builder().build().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_transport_exit_closes_adapters() {
        let adapters = Arc::new(AdapterRegistry::new());
        let stub = Arc::new(StubAdapter::new("postgres"));
        adapters.register(stub.clone()).await.unwrap();

        let server = McpServer::builder()
            .adapters(Arc::clone(&adapters))
            .build()
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        // Cancelling up front makes the accept loop return at once
        server.shutdown();
        let result =
            tokio::time::timeout(Duration::from_secs(5), server.run_with_listener(listener))
                .await
                .unwrap();
        assert!(result.is_ok());
        assert_eq!(stub.closes.load(Ordering::SeqCst), 1);
    }
}
