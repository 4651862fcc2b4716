//! MCP method handlers
//!
//! One handler per method, each registered on the JSON-RPC dispatcher. The
//! uninitialized-session gate is enforced by the transport, not here.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use mcp_storage_json_rpc::{JsonRpcHandler, RequestContext, RequestParams};
use mcp_storage_protocol::{
    CallToolRequest, Implementation, InitializeRequest, InitializeResult, ListToolsResult,
    McpError, McpResult, ProgressNotificationParams, ServerCapabilities, methods,
};
use mcp_storage_session::BoxedSessionStorage;

use crate::tool::{ToolContext, ToolRegistry};

/// Handler for `initialize`
pub struct InitializeHandler {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    storage: Option<Arc<BoxedSessionStorage>>,
}

impl InitializeHandler {
    pub fn new(server_info: Implementation, storage: Option<Arc<BoxedSessionStorage>>) -> Self {
        Self {
            server_info,
            capabilities: ServerCapabilities::tools_only(),
            storage,
        }
    }
}

#[async_trait]
impl JsonRpcHandler for InitializeHandler {
    type Error = McpError;

    async fn handle(
        &self,
        _method: &str,
        params: Option<RequestParams>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let params =
            params.ok_or_else(|| McpError::InvalidParameters("missing initialize params".into()))?;
        let request: InitializeRequest = serde_json::from_value(params.into_value())
            .map_err(|e| McpError::InvalidParameters(e.to_string()))?;

        debug!(
            client_protocol_version = %request.protocol_version,
            client_name = %request.client_info.name,
            client_version = %request.client_info.version,
            "Initialize request"
        );

        if let Err(e) = request.negotiate_version() {
            warn!(
                client_protocol_version = %request.protocol_version,
                "Protocol version mismatch"
            );
            return Err(e);
        }

        if let (Some(session_id), Some(storage)) = (&ctx.session_id, &self.storage) {
            let client_info = serde_json::to_value(&request.client_info)?;
            storage
                .mark_initialized(session_id, client_info)
                .await
                .map_err(|e| McpError::SessionError(e.to_string()))?;
            debug!(session_id = %session_id, "Session initialized");
        }

        info!(
            client_name = %request.client_info.name,
            client_version = %request.client_info.version,
            "Client initialized"
        );

        let result = InitializeResult::new(self.capabilities.clone(), self.server_info.clone());
        Ok(serde_json::to_value(result)?)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![methods::INITIALIZE.to_string()]
    }
}

/// Handler for `notifications/initialized`; acknowledgement only
pub struct InitializedNotificationHandler;

#[async_trait]
impl JsonRpcHandler for InitializedNotificationHandler {
    type Error = McpError;

    async fn handle(
        &self,
        _method: &str,
        _params: Option<RequestParams>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        debug!(session_id = ?ctx.session_id, "Client initialized notification received");
        Ok(Value::Null)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![methods::INITIALIZED.to_string()]
    }
}

/// Ping handler for ping endpoint
pub struct PingHandler;

#[async_trait]
impl JsonRpcHandler for PingHandler {
    type Error = McpError;

    async fn handle(
        &self,
        _method: &str,
        _params: Option<RequestParams>,
        _ctx: RequestContext,
    ) -> McpResult<Value> {
        Ok(json!({}))
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![methods::PING.to_string()]
    }
}

/// Handler for tools/list requests
pub struct ListToolsHandler {
    registry: Arc<ToolRegistry>,
}

impl ListToolsHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JsonRpcHandler for ListToolsHandler {
    type Error = McpError;

    async fn handle(
        &self,
        _method: &str,
        _params: Option<RequestParams>,
        _ctx: RequestContext,
    ) -> McpResult<Value> {
        let result = ListToolsResult {
            tools: self.registry.list_tools(),
        };
        Ok(serde_json::to_value(result)?)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![methods::TOOLS_LIST.to_string()]
    }
}

/// Handler for tools/call requests
///
/// When the caller supplies `_meta.progressToken`, a start and a completion
/// `notifications/progress` are pushed to the session's channel, if it has one.
pub struct CallToolHandler {
    registry: Arc<ToolRegistry>,
}

impl CallToolHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JsonRpcHandler for CallToolHandler {
    type Error = McpError;

    async fn handle(
        &self,
        _method: &str,
        params: Option<RequestParams>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let params =
            params.ok_or_else(|| McpError::InvalidParameters("missing tools/call params".into()))?;
        let raw = params.into_value();
        let progress_token = ProgressNotificationParams::token_from_params(&raw);
        let request: CallToolRequest =
            serde_json::from_value(raw).map_err(|e| McpError::InvalidParameters(e.to_string()))?;

        let report = |progress: u64| {
            if let Some(token) = &progress_token {
                let params = ProgressNotificationParams::new(token.clone(), progress, Some(1));
                if let Ok(params) = serde_json::to_value(params) {
                    ctx.notify(methods::PROGRESS, Some(params));
                }
            }
        };

        report(0);
        let tool_ctx = ToolContext::new(ctx.session_id.clone(), ctx.cancellation.clone());
        let args = request.arguments.unwrap_or_else(|| json!({}));
        let result = self.registry.call_tool(&request.name, args, tool_ctx).await?;
        report(1);

        Ok(serde_json::to_value(result)?)
    }

    fn supported_methods(&self) -> Vec<String> {
        vec![methods::TOOLS_CALL.to_string()]
    }
}
