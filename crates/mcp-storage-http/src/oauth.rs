//! OAuth discovery stubs
//!
//! Some MCP clients probe for an authorization server before talking to the endpoint. These
//! handlers answer that probe with a permissive in-process mock. Nothing is verified.

use std::collections::HashMap;

use chrono::Utc;
use hyper::{StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use crate::json_rpc_responses::{
    McpResponse, bad_request_response, json_response, redirect_response,
};

pub const METADATA_PATH: &str = "/.well-known/oauth-authorization-server";
pub const REGISTER_PATH: &str = "/register";
pub const AUTHORIZE_PATH: &str = "/authorize";
pub const TOKEN_PATH: &str = "/token";

const TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Serialize)]
struct AuthorizationServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    registration_endpoint: String,
    response_types_supported: Vec<&'static str>,
    grant_types_supported: Vec<&'static str>,
    code_challenge_methods_supported: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ClientRegistrationRequest {
    #[serde(default)]
    redirect_uris: Option<Value>,
    #[serde(default)]
    client_name: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ClientRegistrationResponse {
    client_id: String,
    client_secret: String,
    client_id_issued_at: i64,
    client_secret_expires_at: i64,
    redirect_uris: Option<Value>,
    grant_types: Vec<&'static str>,
    response_types: Vec<&'static str>,
    client_name: Option<Value>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
}

/// Paths served by the stubs
pub fn is_oauth_path(path: &str) -> bool {
    matches!(
        path,
        METADATA_PATH | REGISTER_PATH | AUTHORIZE_PATH | TOKEN_PATH
    )
}

/// `GET /.well-known/oauth-authorization-server`
pub fn authorization_server_metadata(host: &str) -> McpResponse {
    let base = format!("http://{}", host);
    let metadata = AuthorizationServerMetadata {
        authorization_endpoint: format!("{}{}", base, AUTHORIZE_PATH),
        token_endpoint: format!("{}{}", base, TOKEN_PATH),
        registration_endpoint: format!("{}{}", base, REGISTER_PATH),
        issuer: base,
        response_types_supported: vec!["code"],
        grant_types_supported: vec!["authorization_code"],
        code_challenge_methods_supported: vec!["S256"],
    };
    json_response(StatusCode::OK, &json!(metadata))
}

/// `POST /register`
pub fn register_client(body: &[u8]) -> McpResponse {
    let Ok(request) = serde_json::from_slice::<ClientRegistrationRequest>(body) else {
        return bad_request_response("Invalid request body");
    };

    let response = ClientRegistrationResponse {
        client_id: Uuid::new_v4().to_string(),
        client_secret: Uuid::new_v4().to_string(),
        client_id_issued_at: Utc::now().timestamp(),
        client_secret_expires_at: 0,
        redirect_uris: request.redirect_uris,
        grant_types: vec!["authorization_code"],
        response_types: vec!["code"],
        client_name: request.client_name,
    };
    json_response(StatusCode::OK, &json!(response))
}

/// `GET /authorize`: redirect straight back with a fresh code and the caller's state
pub fn authorize(uri: &Uri) -> McpResponse {
    let params: HashMap<String, String> = uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let Some(redirect_uri) = params.get("redirect_uri").filter(|uri| !uri.is_empty()) else {
        return bad_request_response("redirect_uri is required");
    };
    let Ok(mut location) = Url::parse(redirect_uri) else {
        return bad_request_response("redirect_uri is not a valid URL");
    };

    {
        let mut pairs = location.query_pairs_mut();
        pairs.append_pair("code", &Uuid::new_v4().to_string());
        if let Some(state) = params.get("state").filter(|state| !state.is_empty()) {
            pairs.append_pair("state", state);
        }
    }
    redirect_response(location.as_str())
}

/// `POST /token`, JSON or form encoded
pub fn token(body: &[u8]) -> McpResponse {
    let grant_type = match serde_json::from_slice::<HashMap<String, Value>>(body) {
        Ok(fields) => fields
            .get("grant_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(_) => url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "grant_type")
            .map(|(_, value)| value.into_owned()),
    };

    if grant_type.as_deref() != Some("authorization_code") {
        return json_response(
            StatusCode::BAD_REQUEST,
            &json!({"error": "unsupported_grant_type"}),
        );
    }

    let response = TokenResponse {
        access_token: Uuid::new_v4().to_string(),
        token_type: "Bearer",
        expires_in: TOKEN_LIFETIME_SECS,
    };
    json_response(StatusCode::OK, &json!(response))
}
