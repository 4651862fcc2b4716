//! Wire decoding and encoding of JSON-RPC bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JsonRpcError, JsonRpcTransportError};
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcMessage;
use crate::types::RequestId;

/// One element of a decoded batch; malformed elements are kept as ready-made errors
pub type BatchItem = Result<JsonRpcRequest, JsonRpcError>;

/// A decoded request body
#[derive(Debug, Clone)]
pub enum Incoming {
    Single(JsonRpcRequest),
    Batch(Vec<BatchItem>),
    /// Valid JSON that is not a request; answered with the carried -32600 error
    Invalid(JsonRpcError),
}

impl Incoming {
    /// Method of a single request, `None` for batches
    pub fn single_method(&self) -> Option<&str> {
        match self {
            Incoming::Single(request) => Some(request.method.as_str()),
            Incoming::Batch(_) | Incoming::Invalid(_) => None,
        }
    }

    /// True when nothing in the body expects an answer
    pub fn is_notification_only(&self) -> bool {
        match self {
            Incoming::Single(request) => request.is_notification(),
            Incoming::Batch(items) => {
                !items.is_empty()
                    && items
                        .iter()
                        .all(|item| matches!(item, Ok(request) if request.is_notification()))
            }
            Incoming::Invalid(_) => false,
        }
    }

    /// Ids of every call in the body, in order
    pub fn call_ids(&self) -> Vec<RequestId> {
        match self {
            Incoming::Single(request) => request.id.clone().into_iter().collect(),
            Incoming::Batch(items) => items
                .iter()
                .filter_map(|item| match item {
                    Ok(request) => request.id.clone(),
                    Err(error) => Some(error.id.clone()),
                })
                .collect(),
            Incoming::Invalid(error) => vec![error.id.clone()],
        }
    }
}

/// What the dispatcher writes back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcOutput {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

/// Decode a raw body into a single request or a batch.
///
/// Only a body that is not JSON at all yields a -32700 error with a `null` id. JSON that
/// is not a valid request becomes [`Incoming::Invalid`] with the id salvaged when possible.
pub fn decode(bytes: &[u8]) -> Result<Incoming, JsonRpcError> {
    let value = serde_json::from_slice::<Value>(bytes)
        .map_err(|e| JsonRpcError::parse_error(Some(e.to_string())))?;

    Ok(match value {
        Value::Array(items) => Incoming::Batch(items.into_iter().map(decode_item).collect()),
        other => match decode_item(other) {
            Ok(request) => Incoming::Single(request),
            Err(error) => Incoming::Invalid(error),
        },
    })
}

fn decode_item(item: Value) -> BatchItem {
    // Salvage the id so the element error is still correlatable
    let id = item
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
        .unwrap_or(RequestId::Null);

    serde_json::from_value::<JsonRpcRequest>(item)
        .map_err(|e| JsonRpcError::invalid_request(id, &e.to_string()))
}

pub fn encode(output: &JsonRpcOutput) -> Result<Vec<u8>, JsonRpcTransportError> {
    Ok(serde_json::to_vec(output)?)
}
