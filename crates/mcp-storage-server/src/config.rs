//! Command-line and environment configuration

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

use mcp_storage_http::{ServerConfig, TransportMode};

use crate::{McpServerError, Result};

/// MCP gateway for PostgreSQL and MySQL
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-storage", version, about)]
pub struct Args {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PORT", default_value_t = 5435)]
    pub port: u16,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Debug logging, including request and response bodies
    #[arg(
        long,
        env = "DEBUG",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub debug: bool,

    /// PostgreSQL connection URL
    #[arg(long, env = "POSTGRES_URL")]
    pub postgres_url: Option<String>,

    /// MySQL DSN, either `mysql://` or `user:pass@tcp(host:port)/db`
    #[arg(long, env = "MYSQL_DSN")]
    pub mysql_dsn: Option<String>,

    /// stateless, session or sse
    #[arg(long, env = "MCP_TRANSPORT")]
    pub transport: Option<TransportMode>,

    /// Selects the session transport when --transport is not given
    #[arg(
        long,
        env = "MCP_USE_SESSION",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub use_session: bool,

    #[arg(long, env = "MCP_SESSION_TTL_SECS", default_value_t = 1800)]
    pub session_ttl_secs: u64,

    #[arg(long, env = "MCP_SSE_KEEPALIVE_SECS", default_value_t = 30)]
    pub sse_keepalive_secs: u64,

    /// Outbound messages buffered per SSE session before new ones are dropped
    #[arg(long, env = "MCP_SSE_QUEUE_CAPACITY", default_value_t = 100)]
    pub sse_queue_capacity: usize,

    /// Refuse to start when no database adapter connects
    #[arg(
        long,
        env = "MCP_REQUIRE_ADAPTER",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub require_adapter: bool,

    #[arg(
        long,
        env = "MCP_ENABLE_OAUTH_STUBS",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value_t = true
    )]
    pub enable_oauth_stubs: bool,

    /// Seconds allowed for open connections to drain at shutdown
    #[arg(long, env = "MCP_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

impl Args {
    /// `MCP_TRANSPORT` wins; the legacy session flag only applies when it is unset
    pub fn transport_mode(&self) -> TransportMode {
        match self.transport {
            Some(mode) => mode,
            None if self.use_session => TransportMode::Session,
            None => TransportMode::Stateless,
        }
    }

    /// Effective log level
    pub fn effective_log_level(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        let host = self.host.trim_matches(|c| c == '[' || c == ']');
        (host, self.port)
            .to_socket_addrs()
            .map_err(|e| {
                McpServerError::Config(format!(
                    "invalid bind address {}:{}: {}",
                    self.host, self.port, e
                ))
            })?
            .next()
            .ok_or_else(|| {
                McpServerError::Config(format!(
                    "bind address {}:{} did not resolve",
                    self.host, self.port
                ))
            })
    }

    /// Transport settings, validated
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let config = ServerConfig {
            bind_address: self.bind_address()?,
            transport: self.transport_mode(),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            sse_keepalive: Duration::from_secs(self.sse_keepalive_secs),
            sse_queue_capacity: self.sse_queue_capacity,
            enable_oauth_stubs: self.enable_oauth_stubs,
            log_bodies: self.debug,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            ..ServerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
