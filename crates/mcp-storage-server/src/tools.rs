//! Built-in tools
//!
//! `random_uint64` is always present. Database tools are added only for adapters
//! that connected at startup.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use mcp_storage_protocol::{CallToolResult, McpError, McpResult, PropertySchema, Tool, ToolSchema};

use crate::adapters::{AdapterRegistry, DatabaseAdapter, MySqlAdapter, PostgresAdapter};
use crate::tool::{FnTool, ToolRegistry};

/// Register every tool the connected adapters support
pub fn register_builtin_tools(tools: &ToolRegistry, adapters: &AdapterRegistry) -> McpResult<()> {
    tools.register(random_uint64())?;

    if let Some(postgres) = adapters.get(PostgresAdapter::NAME) {
        tools.register(schemas_tool(
            "postgres_schemas",
            "List all schemas in the PostgreSQL database",
            &postgres,
        ))?;
        tools.register(schema_ddls_tool(
            "postgres_schema_ddls",
            "Get DDL statements for a PostgreSQL schema",
            &postgres,
        ))?;
        tools.register(query_select_tool(
            "postgres_query_select",
            "Execute a SELECT query on PostgreSQL database",
            &postgres,
        ))?;
    }

    if let Some(mysql) = adapters.get(MySqlAdapter::NAME) {
        tools.register(query_select_tool(
            "mysql_query_select",
            "Execute a SELECT query on MySQL database",
            &mysql,
        ))?;
        tools.register(schema_ddls_tool(
            "mysql_schema_ddls",
            "Get DDL statements for a MySQL schema",
            &mysql,
        ))?;
    }

    info!(total_tools = tools.len(), "Tools registered");
    Ok(())
}

fn random_uint64() -> FnTool {
    FnTool::new(
        Tool::new("random_uint64", ToolSchema::object())
            .with_description("Generate a random 64-bit unsigned integer"),
        |_args, _ctx| async {
            let value: u64 = rand::random();
            Ok(CallToolResult::text(format!(r#"{{"value": {}}}"#, value)))
        },
    )
}

fn schemas_tool(name: &str, description: &str, adapter: &Arc<dyn DatabaseAdapter>) -> FnTool {
    let adapter = Arc::clone(adapter);
    FnTool::new(
        Tool::new(name, ToolSchema::object()).with_description(description),
        move |_args, ctx| {
            let adapter = Arc::clone(&adapter);
            async move {
                let schemas = adapter.list_schemas(&ctx.cancellation).await?;
                json_text(&json!({ "schemas": schemas }))
            }
        },
    )
}

fn schema_ddls_tool(name: &str, description: &str, adapter: &Arc<dyn DatabaseAdapter>) -> FnTool {
    let adapter = Arc::clone(adapter);
    FnTool::new(
        Tool::new(
            name,
            ToolSchema::object()
                .with_property("schema_name", PropertySchema::string("Name of the schema"))
                .with_required(vec!["schema_name".to_string()]),
        )
        .with_description(description),
        move |args, ctx| {
            let adapter = Arc::clone(&adapter);
            async move {
                let schema = required_str(&args, "schema_name")?;
                let ddl = adapter.get_schema_ddl(&ctx.cancellation, &schema).await?;
                Ok(CallToolResult::text(ddl))
            }
        },
    )
}

fn query_select_tool(
    name: &str,
    description: &str,
    adapter: &Arc<dyn DatabaseAdapter>,
) -> FnTool {
    let adapter = Arc::clone(adapter);
    FnTool::new(
        Tool::new(
            name,
            ToolSchema::object()
                .with_property("query", PropertySchema::string("SELECT query to execute"))
                .with_required(vec!["query".to_string()]),
        )
        .with_description(description),
        move |args, ctx| {
            let adapter = Arc::clone(&adapter);
            async move {
                let query = required_str(&args, "query")?;
                let result = adapter.execute_select(&ctx.cancellation, &query).await?;
                json_text(&result)
            }
        },
    )
}

/// A non-empty string argument
fn required_str(args: &Value, name: &str) -> McpResult<String> {
    match args.get(name) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(McpError::tool_execution(format!("{} is required", name)))
        }
        Some(_) => Err(McpError::tool_execution(format!(
            "invalid parameters: {} must be a string",
            name
        ))),
    }
}

fn json_text<T: serde::Serialize>(value: &T) -> McpResult<CallToolResult> {
    Ok(CallToolResult::text(serde_json::to_string(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::StubAdapter;
    use crate::tool::ToolContext;
    use tokio_util::sync::CancellationToken;

    async fn registry_with(adapter_names: &[&'static str]) -> ToolRegistry {
        let adapters = AdapterRegistry::new();
        for name in adapter_names {
            adapters
                .register(Arc::new(StubAdapter::new(name)))
                .await
                .unwrap();
        }
        let tools = ToolRegistry::new();
        register_builtin_tools(&tools, &adapters).unwrap();
        tools
    }

    fn names(tools: &ToolRegistry) -> Vec<String> {
        tools.list_tools().into_iter().map(|tool| tool.name).collect()
    }

    #[tokio::test]
    async fn test_only_random_without_adapters() {
        let tools = registry_with(&[]).await;
        assert_eq!(names(&tools), vec!["random_uint64"]);

        let result = tools
            .call_tool("random_uint64", json!({}), ToolContext::default())
            .await
            .unwrap();
        let payload: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
        assert!(payload["value"].is_u64());
    }

    #[tokio::test]
    async fn test_tools_follow_connected_adapters() {
        let tools = registry_with(&["postgres", "mysql"]).await;
        assert_eq!(
            names(&tools),
            vec![
                "mysql_query_select",
                "mysql_schema_ddls",
                "postgres_query_select",
                "postgres_schema_ddls",
                "postgres_schemas",
                "random_uint64",
            ]
        );

        let mysql_only = registry_with(&["mysql"]).await;
        assert!(!mysql_only.contains("postgres_schemas"));
        assert!(mysql_only.contains("mysql_schema_ddls"));
    }

    #[tokio::test]
    async fn test_schemas_and_query_results() {
        let tools = registry_with(&["postgres"]).await;

        let schemas = tools
            .call_tool("postgres_schemas", json!({}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(schemas.first_text(), Some(r#"{"schemas":[{"name":"public"}]}"#));

        let rows = tools
            .call_tool(
                "postgres_query_select",
                json!({"query": "  select 1"}),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(!rows.is_error);
        let rows: Value = serde_json::from_str(rows.first_text().unwrap()).unwrap();
        assert_eq!(rows, json!({"columns": ["?column?"], "rows": [[1]]}));
    }

    #[tokio::test]
    async fn test_failures_are_error_results() {
        let tools = registry_with(&["postgres"]).await;

        let rejected = tools
            .call_tool(
                "postgres_query_select",
                json!({"query": "DROP TABLE x"}),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(rejected.is_error);
        assert_eq!(
            rejected.first_text(),
            Some("Error: only SELECT queries are allowed")
        );

        let missing = tools
            .call_tool("postgres_schema_ddls", json!({}), ToolContext::default())
            .await
            .unwrap();
        assert!(missing.is_error);
        assert_eq!(missing.first_text(), Some("Error: schema_name is required"));

        let empty = tools
            .call_tool(
                "postgres_query_select",
                json!({"query": ""}),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(empty.first_text(), Some("Error: query is required"));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let tools = registry_with(&["postgres"]).await;
        let token = CancellationToken::new();
        token.cancel();

        let result = tools
            .call_tool(
                "postgres_schema_ddls",
                json!({"schema_name": "public"}),
                ToolContext::new(None, token),
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Error: request cancelled"));
    }

    #[test]
    fn test_required_str() {
        assert_eq!(required_str(&json!({"q": "x"}), "q").unwrap(), "x");
        assert!(required_str(&json!({"q": "  "}), "q").is_err());
        assert!(required_str(&json!({"q": 3}), "q").is_err());
        assert!(required_str(&json!({}), "q").is_err());
    }
}
