//! HTTP MCP Server with SessionStorage integration
//!
//! One hyper accept loop serves every transport mode. The mode only changes which routes
//! exist and how `POST` bodies are bound to sessions.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mcp_storage_json_rpc::{JsonRpcDispatcher, JsonRpcHandler};
use mcp_storage_protocol::{McpError, PROTOCOL_VERSION};
use mcp_storage_session::{BoxedSessionStorage, InMemorySessionStorage, SessionSweeper};

use crate::json_rpc_responses::*;
use crate::{CorsLayer, HttpMcpError, Result, SessionMcpHandler, StreamConfig, StreamManager, oauth};

/// How `POST` bodies relate to sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// `POST /`, no sessions
    #[default]
    Stateless,
    /// `POST /` with `Mcp-Session-Id`
    Session,
    /// `GET /sse` + `POST /message?sessionId=`
    Sse,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Stateless => "stateless",
            TransportMode::Session => "session",
            TransportMode::Sse => "sse",
        }
    }

    pub fn uses_sessions(&self) -> bool {
        !matches!(self, TransportMode::Stateless)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stateless" => Ok(TransportMode::Stateless),
            "session" => Ok(TransportMode::Session),
            "sse" => Ok(TransportMode::Sse),
            other => Err(format!(
                "unknown transport '{}', expected stateless, session or sse",
                other
            )),
        }
    }
}

/// Configuration for the HTTP MCP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    pub transport: TransportMode,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Inactivity after which a session is swept
    pub session_ttl: Duration,
    pub sse_keepalive: Duration,
    /// Capacity of each SSE session's outbound queue
    pub sse_queue_capacity: usize,
    /// Serve the OAuth discovery stubs
    pub enable_oauth_stubs: bool,
    /// Log request and response bodies at debug level
    pub log_bodies: bool,
    /// Upper bound on connection draining at shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 5435)),
            transport: TransportMode::default(),
            enable_cors: true,
            max_body_size: 1024 * 1024, // 1MB
            session_ttl: Duration::from_secs(30 * 60),
            sse_keepalive: Duration::from_secs(30),
            sse_queue_capacity: 100,
            enable_oauth_stubs: true,
            log_bodies: false,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl.is_zero() {
            return Err(HttpMcpError::InvalidConfig(
                "session TTL must be greater than zero".into(),
            ));
        }
        if self.sse_queue_capacity == 0 {
            return Err(HttpMcpError::InvalidConfig(
                "SSE queue capacity must be greater than zero".into(),
            ));
        }
        if self.sse_keepalive.is_zero() {
            return Err(HttpMcpError::InvalidConfig(
                "SSE keep-alive interval must be greater than zero".into(),
            ));
        }
        if self.max_body_size == 0 {
            return Err(HttpMcpError::InvalidConfig(
                "maximum body size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            queue_capacity: self.sse_queue_capacity,
            keepalive_interval: self.sse_keepalive,
        }
    }
}

/// Builder for HTTP MCP server with pluggable storage
pub struct HttpMcpServerBuilder {
    config: ServerConfig,
    dispatcher: JsonRpcDispatcher<McpError>,
    session_storage: Arc<BoxedSessionStorage>,
}

impl HttpMcpServerBuilder {
    /// Create a new builder with in-memory storage
    pub fn new() -> Self {
        Self::with_storage(Arc::new(InMemorySessionStorage::new()))
    }

    /// Create a new builder with specific session storage
    pub fn with_storage(session_storage: Arc<BoxedSessionStorage>) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: JsonRpcDispatcher::<McpError>::new(),
            session_storage,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn transport(mut self, transport: TransportMode) -> Self {
        self.config.transport = transport;
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn sse_keepalive(mut self, interval: Duration) -> Self {
        self.config.sse_keepalive = interval;
        self
    }

    pub fn sse_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.sse_queue_capacity = capacity;
        self
    }

    pub fn oauth_stubs(mut self, enable: bool) -> Self {
        self.config.enable_oauth_stubs = enable;
        self
    }

    pub fn log_bodies(mut self, enable: bool) -> Self {
        self.config.log_bodies = enable;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Register a JSON-RPC handler for specific methods
    pub fn register_handler<H>(mut self, methods: Vec<String>, handler: H) -> Self
    where
        H: JsonRpcHandler<Error = McpError> + 'static,
    {
        self.dispatcher.register_methods(methods, handler);
        self
    }

    /// Build the HTTP MCP server
    pub fn build(self) -> Result<HttpMcpServer> {
        self.config.validate()?;

        let shutdown = CancellationToken::new();
        let stream_manager = Arc::new(StreamManager::new(
            Arc::clone(&self.session_storage),
            self.config.stream_config(),
            shutdown.clone(),
        ));
        let config = Arc::new(self.config);

        let session_handler = SessionMcpHandler::new(
            Arc::clone(&config),
            Arc::new(self.dispatcher),
            Arc::clone(&self.session_storage),
            Arc::clone(&stream_manager),
            shutdown.clone(),
        );

        Ok(HttpMcpServer {
            config,
            session_storage: self.session_storage,
            stream_manager,
            session_handler,
            shutdown,
        })
    }
}

impl Default for HttpMcpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP MCP Server with SessionStorage integration
#[derive(Clone)]
pub struct HttpMcpServer {
    config: Arc<ServerConfig>,
    session_storage: Arc<BoxedSessionStorage>,
    stream_manager: Arc<StreamManager>,
    session_handler: SessionMcpHandler,
    /// Root token; cancelling it stops the accept loop and every session
    shutdown: CancellationToken,
}

impl HttpMcpServer {
    /// Create a new builder with default in-memory storage
    pub fn builder() -> HttpMcpServerBuilder {
        HttpMcpServerBuilder::new()
    }

    /// Create a new builder with specific session storage
    pub fn builder_with_storage(session_storage: Arc<BoxedSessionStorage>) -> HttpMcpServerBuilder {
        HttpMcpServerBuilder::with_storage(session_storage)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stream_manager(&self) -> Arc<StreamManager> {
        Arc::clone(&self.stream_manager)
    }

    /// Bind the configured address and serve until the shutdown token is cancelled
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("HTTP MCP server listening on {}", local_addr);
        info!("Transport: {}", self.config.transport);
        info!("Session storage: {}", self.session_storage.backend_name());

        let sweeper = self.config.transport.uses_sessions().then(|| {
            SessionSweeper::spawn(
                Arc::clone(&self.session_storage),
                self.config.session_ttl,
                self.shutdown.child_token(),
            )
        });

        let graceful = GracefulShutdown::new();
        let router = Router {
            config: Arc::clone(&self.config),
            session_handler: self.session_handler.clone(),
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    debug!("New connection from {}", peer_addr);

                    let router = router.clone();
                    let service = service_fn(move |req| {
                        let router = router.clone();
                        async move { router.route(req).await }
                    });
                    let connection = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service);
                    let connection = graceful.watch(connection);

                    tokio::spawn(async move {
                        if let Err(err) = connection.await {
                            // Filter out common client disconnection errors that aren't actual problems
                            if err.is_incomplete_message() || err.is_canceled() {
                                debug!("Client disconnected: {}", err);
                            } else {
                                error!("Error serving connection: {}", err);
                            }
                        }
                    });
                }
            }
        }

        drop(listener);

        // Session tokens are children of the root token, so push loops are already exiting
        tokio::select! {
            _ = graceful.shutdown() => info!("All connections closed"),
            _ = tokio::time::sleep(self.config.shutdown_grace) => {
                warn!(
                    grace_secs = self.config.shutdown_grace.as_secs_f64(),
                    "Grace period elapsed with connections still open"
                );
            }
        }

        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                warn!("Session sweeper ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Stop accepting connections and end every session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Routes requests to the handler for the configured transport
#[derive(Clone)]
struct Router {
    config: Arc<ServerConfig>,
    session_handler: SessionMcpHandler,
}

const ALLOW_POST: &str = "POST, OPTIONS";
const ALLOW_POST_DELETE: &str = "POST, DELETE, OPTIONS";
const ALLOW_GET: &str = "GET, OPTIONS";

impl Router {
    async fn route(&self, req: Request<Incoming>) -> std::result::Result<McpResponse, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("Handling {} {}", method, path);

        let mut response = self.dispatch(req, &method, &path).await;
        if self.config.enable_cors {
            CorsLayer::apply_cors_headers(response.headers_mut());
        }
        debug!(status = response.status().as_u16(), "{} {}", method, path);
        Ok(response)
    }

    async fn dispatch(&self, req: Request<Incoming>, method: &Method, path: &str) -> McpResponse {
        if method == Method::OPTIONS {
            return no_content_response();
        }

        let handler = &self.session_handler;
        let transport = self.config.transport;

        match (path, transport) {
            ("/health", _) => match *method {
                Method::GET => health_response(),
                _ => method_not_allowed_response(ALLOW_GET),
            },
            ("/", TransportMode::Stateless) => match *method {
                Method::POST => handler.handle_stateless_post(req).await,
                _ => method_not_allowed_response(ALLOW_POST),
            },
            ("/", TransportMode::Session) => match *method {
                Method::POST => handler.handle_session_post(req).await,
                Method::DELETE => handler.handle_session_delete(req).await,
                _ => method_not_allowed_response(ALLOW_POST_DELETE),
            },
            ("/sse", TransportMode::Sse) => match *method {
                Method::GET => handler.handle_sse_get().await,
                _ => method_not_allowed_response(ALLOW_GET),
            },
            ("/message", TransportMode::Sse) => match *method {
                Method::POST => handler.handle_message_post(req).await,
                _ => method_not_allowed_response(ALLOW_POST),
            },
            (path, _) if self.config.enable_oauth_stubs && oauth::is_oauth_path(path) => {
                self.oauth(req, method, path).await
            }
            _ => not_found_response(),
        }
    }

    async fn oauth(&self, req: Request<Incoming>, method: &Method, path: &str) -> McpResponse {
        match (path, method) {
            (oauth::METADATA_PATH, &Method::GET) => {
                let host = req
                    .headers()
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or("localhost")
                    .to_string();
                oauth::authorization_server_metadata(&host)
            }
            (oauth::AUTHORIZE_PATH, &Method::GET) => oauth::authorize(req.uri()),
            (oauth::REGISTER_PATH, &Method::POST) => {
                match self.session_handler.read_body(req).await {
                    Ok(body) => oauth::register_client(&body),
                    Err(response) => response,
                }
            }
            (oauth::TOKEN_PATH, &Method::POST) => match self.session_handler.read_body(req).await {
                Ok(body) => oauth::token(&body),
                Err(response) => response,
            },
            (oauth::METADATA_PATH | oauth::AUTHORIZE_PATH, _) => {
                method_not_allowed_response(ALLOW_GET)
            }
            _ => method_not_allowed_response(ALLOW_POST),
        }
    }
}

/// `GET /health`
fn health_response() -> McpResponse {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "version": PROTOCOL_VERSION,
        }),
    )
}
