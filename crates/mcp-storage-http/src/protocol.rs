//! Session identifier extraction from headers and query strings

use hyper::Uri;

/// Header carrying the session identifier in both directions
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Query parameter naming the session on `POST /message`
pub const SESSION_QUERY_PARAM: &str = "sessionId";

/// Extract MCP session ID from HTTP request headers
pub fn extract_session_id(headers: &hyper::HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Extract `sessionId` from the request URI query
pub fn extract_query_session_id(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == SESSION_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Relative URL announced in the SSE `endpoint` event
pub fn message_endpoint(session_id: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(SESSION_QUERY_PARAM, session_id)
        .finish();
    format!("/message?{}", query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::HeaderMap;

    #[test]
    fn test_header_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_session_id(&headers), None);

        headers.insert("Mcp-Session-Id", "test-session-123".parse().unwrap());
        assert_eq!(
            extract_session_id(&headers),
            Some("test-session-123".to_string())
        );
    }

    #[test]
    fn test_query_extraction() {
        let uri: Uri = "/message?foo=1&sessionId=abc%2D1".parse().unwrap();
        assert_eq!(extract_query_session_id(&uri), Some("abc-1".to_string()));

        let uri: Uri = "/message?sessionId=".parse().unwrap();
        assert_eq!(extract_query_session_id(&uri), None);

        let uri: Uri = "/message".parse().unwrap();
        assert_eq!(extract_query_session_id(&uri), None);
    }

    #[test]
    fn test_endpoint_round_trips_through_query() {
        let endpoint = message_endpoint("0190-abc");
        assert_eq!(endpoint, "/message?sessionId=0190-abc");

        let uri: Uri = endpoint.parse().unwrap();
        assert_eq!(extract_query_session_id(&uri), Some("0190-abc".to_string()));
    }
}
