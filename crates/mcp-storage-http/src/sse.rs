//! Server-Sent Events (SSE) framing for the push channel

use bytes::Bytes;

/// SSE event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// First event of every stream: where the client must POST its requests
    Endpoint(String),
    /// A serialized JSON-RPC response or notification
    Message(String),
    /// Keep-alive comment line
    KeepAlive,
}

impl SseEvent {
    /// Format as SSE message
    pub fn format(&self) -> String {
        match self {
            SseEvent::Endpoint(url) => format!("event: endpoint\ndata: {}\n\n", url),
            SseEvent::Message(json) => {
                // Multi-line payloads need one data line each
                let mut framed = String::with_capacity(json.len() + 24);
                framed.push_str("event: message\n");
                for line in json.split('\n') {
                    framed.push_str("data: ");
                    framed.push_str(line);
                    framed.push('\n');
                }
                framed.push('\n');
                framed
            }
            SseEvent::KeepAlive => ": keepalive\n\n".to_string(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.format())
    }
}
