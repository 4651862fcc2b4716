//! MCP Initialize Protocol Types
//!
//! Types used for the `initialize` handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{McpError, PROTOCOL_VERSION};

/// Describes the name and version of an MCP implementation (client or server)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities related to root listing support
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities that a client may announce
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

/// Capabilities for tools provided by the server
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapabilities {
    pub list_changed: bool,
}

/// Capabilities the server announces
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

impl ServerCapabilities {
    /// Tool serving only; the tool set is fixed at startup
    pub fn tools_only() -> Self {
        Self {
            tools: Some(ToolsCapabilities {
                list_changed: false,
            }),
            logging: None,
        }
    }
}

/// Parameters for initialize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default)]
    pub client_info: Implementation,
}

impl InitializeRequest {
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }

    /// Only the exact supported version is accepted
    pub fn negotiate_version(&self) -> Result<&'static str, McpError> {
        if self.protocol_version == PROTOCOL_VERSION {
            Ok(PROTOCOL_VERSION)
        } else {
            Err(McpError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                actual: self.protocol_version.clone(),
            })
        }
    }
}

/// Result payload for initialize
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

impl InitializeResult {
    pub fn new(capabilities: ServerCapabilities, server_info: Implementation) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_request_parsing() {
        let request: InitializeRequest = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"roots": {"listChanged": true}},
            "clientInfo": {"name": "inspector", "version": "0.3.0"}
        }))
        .unwrap();

        assert_eq!(request.client_info.name, "inspector");
        assert_eq!(request.negotiate_version().unwrap(), "2024-11-05");
    }

    #[test]
    fn test_version_mismatch() {
        let mut request = InitializeRequest::new(Implementation::new("c", "1"));
        request.protocol_version = "2025-06-18".into();

        let error = request.negotiate_version().unwrap_err();
        assert!(matches!(error, McpError::VersionMismatch { .. }));
    }

    #[test]
    fn test_result_shape() {
        let result = InitializeResult::new(
            ServerCapabilities::tools_only(),
            Implementation::new("MCP Storage Server", "1.0.0"),
        );
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(
            value,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "MCP Storage Server", "version": "1.0.0"}
            })
        );
    }
}
