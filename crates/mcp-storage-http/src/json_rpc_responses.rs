//! HTTP response builders
//!
//! Every response the transports write goes through these helpers, so the body type and the
//! content-type headers stay uniform.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderValue, LOCATION};
use hyper::{Response, StatusCode};
use serde_json::{Value, json};
use tracing::{error, warn};

use mcp_storage_json_rpc::{JsonRpcOutput, encode};

use crate::protocol::SESSION_HEADER;

/// Body type shared by inline JSON responses and SSE streams
pub type UnifiedMcpBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub type McpResponse = Response<UnifiedMcpBody>;

fn application_json() -> HeaderValue {
    HeaderValue::from_static("application/json")
}

pub fn full_body(bytes: impl Into<Bytes>) -> UnifiedMcpBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> UnifiedMcpBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn with_status(status: StatusCode, body: UnifiedMcpBody) -> McpResponse {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// Plain JSON document with the given status
pub fn json_response(status: StatusCode, value: &Value) -> McpResponse {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|e| {
        error!("Failed to serialize JSON response: {}", e);
        b"{}".to_vec()
    });
    let mut response = with_status(status, full_body(bytes));
    response.headers_mut().insert(CONTENT_TYPE, application_json());
    response
}

/// Dispatcher output written as the HTTP body, optionally announcing a session
pub fn jsonrpc_output_response(
    status: StatusCode,
    output: &JsonRpcOutput,
    session_id: Option<&str>,
) -> McpResponse {
    let bytes = match encode(output) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode JSON-RPC output: {}", e);
            return internal_error_response();
        }
    };
    let mut response = jsonrpc_bytes_response(status, bytes);
    if let Some(session_id) = session_id {
        attach_session_header(&mut response, session_id);
    }
    response
}

/// Already-encoded JSON-RPC body
pub fn jsonrpc_bytes_response(status: StatusCode, bytes: Vec<u8>) -> McpResponse {
    let mut response = with_status(status, full_body(bytes));
    response.headers_mut().insert(CONTENT_TYPE, application_json());
    response
}

pub fn attach_session_header(response: &mut McpResponse, session_id: &str) {
    match HeaderValue::from_str(session_id) {
        Ok(value) => {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        Err(e) => warn!(session_id = %session_id, "Session id is not a valid header value: {}", e),
    }
}

/// 204 for bodies that produced no output
pub fn no_content_response() -> McpResponse {
    with_status(StatusCode::NO_CONTENT, empty_body())
}

/// 202 acknowledgement for `POST /message`
pub fn accepted_response() -> McpResponse {
    with_status(StatusCode::ACCEPTED, full_body("Accepted"))
}

pub fn bad_request_response(message: &str) -> McpResponse {
    json_response(StatusCode::BAD_REQUEST, &json!({"error": message}))
}

pub fn not_found_response() -> McpResponse {
    json_response(StatusCode::NOT_FOUND, &json!({"error": "Not Found"}))
}

pub fn method_not_allowed_response(allow: &'static str) -> McpResponse {
    let mut response = json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({"error": "Method not allowed"}),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

pub fn payload_too_large_response(limit: usize) -> McpResponse {
    json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &json!({"error": format!("Request body exceeds {} bytes", limit)}),
    )
}

pub fn internal_error_response() -> McpResponse {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &json!({"error": "Internal Server Error"}),
    )
}

/// 302 to `location`
pub fn redirect_response(location: &str) -> McpResponse {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = with_status(StatusCode::FOUND, empty_body());
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => bad_request_response("redirect_uri is not a valid URL"),
    }
}
