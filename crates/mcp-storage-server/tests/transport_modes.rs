//! End-to-end checks of the three transports over real TCP

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mcp_storage_server::{
    AdapterRegistry, McpServer, ServerConfig, ToolRegistry, TransportMode, register_builtin_tools,
};

const SESSION_HEADER: &str = "mcp-session-id";

struct TestServer {
    server: McpServer,
    base_url: String,
    handle: JoinHandle<mcp_storage_server::Result<()>>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(transport: TransportMode) -> Self {
        Self::start_with(ServerConfig {
            transport,
            ..ServerConfig::default()
        })
        .await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let adapters = Arc::new(AdapterRegistry::new());
        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools, &adapters).unwrap();

        let server = McpServer::builder()
            .config(config)
            .tools(tools)
            .adapters(adapters)
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        Self {
            server,
            base_url,
            handle,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, body: Value, session_id: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(format!("{}/", self.base_url)).json(&body);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.unwrap()
    }

    async fn stop(self) {
        self.server.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

fn initialize_request(id: u64, protocol_version: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": protocol_version,
            "capabilities": {},
            "clientInfo": {"name": "transport-test", "version": "1.0.0"}
        }
    })
}

fn tools_list_request(id: u64) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "tools/list"})
}

fn tool_names(response: &Value) -> Vec<String> {
    response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap().to_string())
        .collect()
}

async fn initialize_session(server: &TestServer) -> String {
    let response = server.post(initialize_request(1, "2024-11-05"), None).await;
    assert_eq!(response.status(), 200);
    let session_id = response
        .headers()
        .get(SESSION_HEADER)
        .expect("initialize must announce a session")
        .to_str()
        .unwrap()
        .to_string();

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "MCP Storage Server");
    session_id
}

/// Read SSE bytes until `done` accepts the accumulated text
async fn read_stream_until(
    response: &mut reqwest::Response,
    buffer: &mut String,
    done: impl Fn(&str) -> bool,
) {
    while !done(buffer) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for SSE data")
            .unwrap()
            .expect("SSE stream ended");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

/// The first complete `message` event carrying a response with `id`
fn find_message(buffer: &str, id: u64) -> Option<Value> {
    buffer
        .split("\n\n")
        .filter_map(|event| event.strip_prefix("event: message\ndata: "))
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .find(|message| message["id"] == json!(id))
}

#[tokio::test]
async fn test_stateless_tools_list_and_call() {
    let server = TestServer::start(TransportMode::Stateless).await;

    let response = server.post(tools_list_request(1), None).await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().get(SESSION_HEADER).is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert!(tool_names(&body).contains(&"random_uint64".to_string()));

    let call = json!({
        "jsonrpc": "2.0",
        "id": "call-1",
        "method": "tools/call",
        "params": {"name": "random_uint64", "arguments": {}}
    });
    let body: Value = server.post(call, None).await.json().await.unwrap();
    assert_eq!(body["id"], "call-1");
    assert!(body["result"].get("isError").is_none());
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let payload: Value = serde_json::from_str(text).unwrap();
    assert!(payload["value"].is_u64());

    let unknown = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {"name": "postgres_schemas"}
    });
    let body: Value = server.post(unknown, None).await.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["error"]["message"], "Tool not found: postgres_schemas");

    server.stop().await;
}

#[tokio::test]
async fn test_stateless_notifications_and_batches() {
    let server = TestServer::start(TransportMode::Stateless).await;

    let response = server
        .post(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}), None)
        .await;
    assert_eq!(response.status(), 204);

    let batch = json!([
        {"jsonrpc": "2.0", "id": 1, "method": "ping"},
        {"jsonrpc": "2.0", "method": "notifications/initialized"},
        {"jsonrpc": "2.0", "id": 2, "method": "tools/list"}
    ]);
    let response = server.post(batch, None).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let responses = body.as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().any(|r| r["id"] == 1 && r["result"] == json!({})));
    assert!(responses.iter().any(|r| r["id"] == 2 && r["result"]["tools"].is_array()));

    let response = server
        .client
        .post(format!("{}/", server.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);

    let body: Value = server
        .post(json!({"id": 9, "method": "tools/list"}), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], 9);

    let body: Value = server
        .post(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}), None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32601);

    server.stop().await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let server = TestServer::start(TransportMode::Session).await;

    let response = server.post(tools_list_request(1), None).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    let session_id = initialize_session(&server).await;

    let response = server.post(tools_list_request(2), Some(&session_id)).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(tool_names(&body), vec!["random_uint64"]);

    let response = server
        .post(initialize_request(3, "1999-01-01"), Some(&session_id))
        .await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["id"], 3);

    // A failed re-initialize leaves the session usable
    let response = server.post(tools_list_request(4), Some(&session_id)).await;
    assert_eq!(response.status(), 200);

    let response = server.post(tools_list_request(5), Some("no-such-session")).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    let response = server
        .client
        .delete(format!("{}/", server.base_url))
        .header(SESSION_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = server.post(tools_list_request(6), Some(&session_id)).await;
    assert_eq!(response.status(), 400);

    server.stop().await;
}

#[tokio::test]
async fn test_session_initialize_with_wrong_version_creates_no_session() {
    let server = TestServer::start(TransportMode::Session).await;

    let response = server.post(initialize_request(1, "2025-06-18"), None).await;
    assert!(response.headers().get(SESSION_HEADER).is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);

    server.stop().await;
}

#[tokio::test]
async fn test_session_expires_after_ttl() {
    let server = TestServer::start_with(ServerConfig {
        transport: TransportMode::Session,
        session_ttl: Duration::from_secs(1),
        ..ServerConfig::default()
    })
    .await;

    let session_id = initialize_session(&server).await;
    let response = server.post(tools_list_request(2), Some(&session_id)).await;
    assert_eq!(response.status(), 200);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let response = server.post(tools_list_request(3), Some(&session_id)).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    server.stop().await;
}

#[tokio::test]
async fn test_sse_push_channel() {
    let server = TestServer::start(TransportMode::Sse).await;

    let mut stream = server
        .client
        .get(format!("{}/sse", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    assert!(
        stream.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut buffer = String::new();
    read_stream_until(&mut stream, &mut buffer, |text| {
        text.starts_with("event: endpoint\ndata: ") && text.contains("\n\n")
    })
    .await;
    let endpoint = buffer
        .trim_start_matches("event: endpoint\ndata: ")
        .split("\n\n")
        .next()
        .unwrap()
        .to_string();
    assert!(endpoint.starts_with("/message?sessionId="));
    buffer.clear();

    let message_url = format!("{}{}", server.base_url, endpoint);
    let response = server
        .client
        .post(&message_url)
        .json(&initialize_request(1, "2024-11-05"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    read_stream_until(&mut stream, &mut buffer, |text| find_message(text, 1).is_some()).await;
    let initialized = find_message(&buffer, 1).unwrap();
    assert_eq!(initialized["result"]["protocolVersion"], "2024-11-05");

    let response = server
        .client
        .post(&message_url)
        .json(&tools_list_request(2))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    read_stream_until(&mut stream, &mut buffer, |text| find_message(text, 2).is_some()).await;
    let listed = find_message(&buffer, 2).unwrap();
    assert_eq!(tool_names(&listed), vec!["random_uint64"]);

    let response = server
        .client
        .post(format!("{}/message?sessionId=unknown", server.base_url))
        .json(&tools_list_request(3))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = server
        .client
        .post(format!("{}/message", server.base_url))
        .json(&tools_list_request(4))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = server.post(tools_list_request(5), None).await;
    assert_eq!(response.status(), 404);

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_health_and_preflight() {
    let server = TestServer::start(TransportMode::Stateless).await;

    let response = server
        .client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "2024-11-05");

    let response = server
        .client
        .request(reqwest::Method::OPTIONS, format!("{}/", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let response = server
        .client
        .get(format!("{}/nowhere", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await;
}
