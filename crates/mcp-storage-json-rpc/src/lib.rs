//! # JSON-RPC 2.0 for the MCP storage gateway
//!
//! Transport-agnostic JSON-RPC 2.0 envelopes plus an async dispatcher that turns a raw
//! request body into an optional raw response body.
//!
//! ## Features
//! - Single requests and batches, decoded in that order
//! - Request identifiers keep their wire shape, and an explicit `null` stays distinct from an absent id
//! - Notifications never produce output, not even an error
//! - Handler errors convert to structured error objects through [`ToJsonRpcError`]

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use codec::{Incoming, JsonRpcOutput, decode, encode};
pub use dispatch::{
    JsonRpcDispatcher, JsonRpcHandler, NotificationSink, RequestContext, ToJsonRpcError,
};
pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject, JsonRpcTransportError};
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcMessage, JsonRpcResponse};
pub use types::RequestId;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}
