use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JsonRpcError;
use crate::types::{JsonRpcVersion, RequestId};

/// A successful JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            result,
        }
    }
}

/// Either a successful response or an error response.
///
/// Keeping the two shapes apart means a serialized envelope carries exactly one of
/// `result` / `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Error response with error field
    Error(JsonRpcError),
    /// Successful response with result field
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response(JsonRpcResponse::success(id, result))
    }

    pub fn error(error: JsonRpcError) -> Self {
        Self::Error(error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JsonRpcMessage::Error(_))
    }

    pub fn id(&self) -> &RequestId {
        match self {
            JsonRpcMessage::Response(resp) => &resp.id,
            JsonRpcMessage::Error(err) => &err.id,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            JsonRpcMessage::Response(resp) => Some(&resp.result),
            JsonRpcMessage::Error(_) => None,
        }
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(error: JsonRpcError) -> Self {
        Self::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_listing_survives_encode_and_decode() {
        let result = json!({"schemas": [{"name": "public"}]});
        let message = JsonRpcMessage::success(RequestId::from(1), result.clone());

        let wire = serde_json::to_string(&message).unwrap();
        let decoded: Value = serde_json::from_str(&wire).unwrap();

        assert_eq!(
            decoded,
            json!({"jsonrpc": "2.0", "id": 1, "result": {"schemas": [{"name": "public"}]}})
        );
        let back: JsonRpcMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.result(), Some(&result));
        assert!(!back.is_error());
    }

    #[test]
    fn test_success_never_carries_error() {
        let message = JsonRpcMessage::success(RequestId::Null, json!({}));
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["id"], Value::Null);
    }
}
