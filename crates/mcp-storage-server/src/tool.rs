//! MCP Tool Trait and Registry
//!
//! Tools are registered once at startup and looked up by name on every `tools/call`.
//! A tool that fails does not fail the RPC: the registry turns the error into a
//! `CallToolResult` with `isError: true` so the calling model sees it as data.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mcp_storage_protocol::{CallToolResult, McpError, McpResult, Tool};

/// Execution context handed to every tool call
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: Option<String>,
    /// Cancelled on client disconnect, session close or shutdown
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: Option<String>, cancellation: CancellationToken) -> Self {
        Self {
            session_id,
            cancellation,
        }
    }
}

/// High-level trait for implementing MCP tools
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Descriptor returned by `tools/list`
    fn tool(&self) -> Tool;

    /// Execute the tool. Errors become `isError` results in the registry.
    async fn call(&self, args: Value, ctx: ToolContext) -> McpResult<CallToolResult>;
}

type ToolFuture = Pin<Box<dyn Future<Output = McpResult<CallToolResult>> + Send>>;
type ToolFn = dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync;

/// Tool backed by an async closure
pub struct FnTool {
    tool: Tool,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(tool: Tool, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<CallToolResult>> + Send + 'static,
    {
        Self {
            tool,
            handler: Box::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.tool.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl McpTool for FnTool {
    fn tool(&self) -> Tool {
        self.tool.clone()
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> McpResult<CallToolResult> {
        (self.handler)(args, ctx).await
    }
}

/// Receives `(name, arguments, result)` for every completed call
pub type ToolCallObserver = Arc<dyn Fn(&str, &Value, &CallToolResult) + Send + Sync>;

/// Name-keyed tool table shared by `tools/list` and `tools/call`
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn McpTool>>>,
    observer: RwLock<Option<ToolCallObserver>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a second tool with the same name is rejected
    pub fn register<T: McpTool + 'static>(&self, tool: T) -> McpResult<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn McpTool>) -> McpResult<()> {
        let name = tool.tool().name;
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(McpError::DuplicateTool(name));
        }
        info!(tool = %name, "Tool registered");
        tools.insert(name, tool);
        Ok(())
    }

    /// Install the diagnostic hook
    pub fn set_observer(&self, observer: ToolCallObserver) {
        *self.observer.write() = Some(observer);
    }

    /// Descriptors sorted by name
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.read().values().map(|tool| tool.tool()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Run a tool by name
    ///
    /// Only an unknown name is an `Err`. Failures inside the tool, including cancellation,
    /// come back as `Ok` results flagged `isError`.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: ToolContext,
    ) -> McpResult<CallToolResult> {
        let tool = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        let cancellation = ctx.cancellation.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(McpError::Cancelled),
            outcome = tool.call(args.clone(), ctx) => outcome,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                debug!(tool = %name, error = %e, "Tool call failed");
                CallToolResult::error(format!("Error: {}", e))
            }
        };

        debug!(
            tool = %name,
            arguments = %args,
            is_error = result.is_error,
            result = ?result.first_text(),
            "Tool call completed"
        );
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(name, &args, &result);
        }

        Ok(result)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_storage_protocol::{PropertySchema, ToolSchema};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl McpTool for EchoTool {
        fn tool(&self) -> Tool {
            Tool::new(
                "echo",
                ToolSchema::object()
                    .with_property("message", PropertySchema::string("Text to echo"))
                    .with_required(vec!["message".to_string()]),
            )
            .with_description("Echo a message")
        }

        async fn call(&self, args: Value, _ctx: ToolContext) -> McpResult<CallToolResult> {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| McpError::missing_param("message"))?;
            Ok(CallToolResult::text(format!("Echo: {}", message)))
        }
    }

    fn failing_tool(name: &str) -> FnTool {
        FnTool::new(
            Tool::new(name, ToolSchema::object()),
            |_args, _ctx| async { Err(McpError::tool_execution("connection refused")) },
        )
    }

    #[tokio::test]
    async fn test_call_registered_tool() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let result = registry
            .call_tool("echo", json!({"message": "hi"}), ToolContext::default())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("Echo: hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .call_tool("nope", json!({}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_result() {
        let registry = ToolRegistry::new();
        registry.register(failing_tool("broken")).unwrap();

        let result = registry
            .call_tool("broken", json!({}), ToolContext::default())
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Error: connection refused"));

        registry.register(EchoTool).unwrap();
        let missing = registry
            .call_tool("echo", json!({}), ToolContext::default())
            .await
            .unwrap();
        assert!(missing.is_error);
        assert!(missing.first_text().unwrap().contains("message"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry.register(EchoTool).unwrap_err();
        assert!(matches!(err, McpError::DuplicateTool(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_is_sorted_by_name() {
        let registry = ToolRegistry::new();
        registry.register(failing_tool("zeta")).unwrap();
        registry.register(EchoTool).unwrap();
        registry.register(failing_tool("alpha")).unwrap();

        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "echo", "zeta"]);
    }

    #[tokio::test]
    async fn test_cancellation_ends_call() {
        let registry = ToolRegistry::new();
        registry
            .register(FnTool::new(
                Tool::new("slow", ToolSchema::object()),
                |_args, _ctx| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(CallToolResult::text("done"))
                },
            ))
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = registry
            .call_tool("slow", json!({}), ToolContext::new(None, token))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Error: request cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_context_never_runs_ready_tool() {
        let registry = ToolRegistry::new();
        registry
            .register(FnTool::new(
                Tool::new("instant", ToolSchema::object()),
                |_args, _ctx| async { Ok(CallToolResult::text("done")) },
            ))
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        for _ in 0..64 {
            let result = registry
                .call_tool("instant", json!({}), ToolContext::new(None, token.clone()))
                .await
                .unwrap();
            assert!(result.is_error);
            assert_eq!(result.first_text(), Some("Error: request cancelled"));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_every_call() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(failing_tool("broken")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.set_observer(Arc::new(move |name, args, result| {
            sink.lock()
                .push((name.to_string(), args.clone(), result.is_error));
        }));

        registry
            .call_tool("echo", json!({"message": "a"}), ToolContext::default())
            .await
            .unwrap();
        registry
            .call_tool("broken", json!({}), ToolContext::default())
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("echo".to_string(), json!({"message": "a"}), false));
        assert!(seen[1].2);
    }
}
