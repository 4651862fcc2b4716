//! JSON-RPC 2.0 over HTTP handler with SessionStorage integration
//!
//! This handler serves the three transport shapes:
//! - stateless `POST /`, answered inline with no lifecycle gate
//! - session-header `POST /` and `DELETE /`, keyed by `Mcp-Session-Id`
//! - `GET /sse` plus `POST /message?sessionId=`, answered through the push channel
//!
//! Session-bound calls pass the lifecycle gate: `initialize` binds (or creates) the session,
//! everything else needs a live session and, for non-notification methods, a completed
//! initialize.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::CONTENT_LENGTH;
use hyper::{Request, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mcp_storage_json_rpc::{
    Incoming, JsonRpcDispatcher, JsonRpcError, JsonRpcMessage, JsonRpcOutput, JsonRpcRequest,
    NotificationSink, RequestContext, RequestId, decode,
};
use mcp_storage_protocol::{McpError, methods};
use mcp_storage_session::{BoxedSessionStorage, SessionInfo, SessionStorageError};

use crate::json_rpc_responses::*;
use crate::protocol::{extract_query_session_id, extract_session_id};
use crate::sse::SseEvent;
use crate::{HttpMcpError, ServerConfig, StreamManager};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Push channel of an SSE-bound call
struct PushChannel {
    done: CancellationToken,
    notifier: Arc<dyn NotificationSink>,
}

/// What a session-bound dispatch produced
#[derive(Debug)]
struct SessionOutcome {
    status: StatusCode,
    output: Option<JsonRpcOutput>,
    /// Session to announce through the response header
    announce_session: Option<String>,
}

impl SessionOutcome {
    fn from_output(output: Option<JsonRpcOutput>) -> Self {
        Self {
            status: StatusCode::OK,
            output,
            announce_session: None,
        }
    }

    /// Every call in the body is answered with `error`; notifications stay silent
    fn rejected(incoming: &Incoming, error: McpError) -> Self {
        let mut ids = incoming.call_ids();
        if ids.is_empty() && !incoming.is_notification_only() {
            ids.push(RequestId::Null);
        }

        let object = error.to_error_object();
        let mut messages: Vec<JsonRpcMessage> = ids
            .into_iter()
            .map(|id| JsonRpcMessage::error(JsonRpcError::new(id, object.clone())))
            .collect();

        let output = match (incoming, messages.len()) {
            (_, 0) => None,
            (Incoming::Single(_) | Incoming::Invalid(_), _) => {
                messages.pop().map(JsonRpcOutput::Single)
            }
            (Incoming::Batch(_), _) => Some(JsonRpcOutput::Batch(messages)),
        };

        Self {
            status: StatusCode::BAD_REQUEST,
            output,
            announce_session: None,
        }
    }
}

/// True when any call in the body needs an initialized session
fn requires_initialized(incoming: &Incoming) -> bool {
    let gated = |request: &JsonRpcRequest| {
        !request.is_notification() && !methods::allowed_before_initialize(&request.method)
    };
    match incoming {
        Incoming::Single(request) => gated(request),
        Incoming::Batch(items) => items
            .iter()
            .any(|item| matches!(item, Ok(request) if gated(request))),
        Incoming::Invalid(_) => false,
    }
}

/// JSON-RPC 2.0 over HTTP handler with shared StreamManager
#[derive(Clone)]
pub struct SessionMcpHandler {
    pub(crate) config: Arc<ServerConfig>,
    dispatcher: Arc<JsonRpcDispatcher<McpError>>,
    storage: Arc<BoxedSessionStorage>,
    stream_manager: Arc<StreamManager>,
    shutdown: CancellationToken,
}

impl SessionMcpHandler {
    pub fn new(
        config: Arc<ServerConfig>,
        dispatcher: Arc<JsonRpcDispatcher<McpError>>,
        storage: Arc<BoxedSessionStorage>,
        stream_manager: Arc<StreamManager>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            dispatcher,
            storage,
            stream_manager,
            shutdown,
        }
    }

    /// `POST /` in stateless mode
    pub async fn handle_stateless_post<B>(&self, req: Request<B>) -> McpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let body = match self.read_body(req).await {
            Ok(body) => body,
            Err(response) => return response,
        };
        self.log_incoming(&body);

        let ctx = RequestContext::new().with_cancellation(self.shutdown.child_token());
        match self.dispatcher.handle_bytes(&body, ctx).await {
            Some(bytes) => {
                self.log_outgoing(&bytes);
                jsonrpc_bytes_response(StatusCode::OK, bytes)
            }
            None => no_content_response(),
        }
    }

    /// `POST /` in session mode
    pub async fn handle_session_post<B>(&self, req: Request<B>) -> McpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let session_id = extract_session_id(req.headers());
        let body = match self.read_body(req).await {
            Ok(body) => body,
            Err(response) => return response,
        };
        self.log_incoming(&body);

        let outcome = self.dispatch_in_session(&body, session_id, None).await;
        self.write_outcome(outcome)
    }

    /// `DELETE /` with a session header; idempotent
    pub async fn handle_session_delete<B>(&self, req: Request<B>) -> McpResponse {
        let Some(session_id) = extract_session_id(req.headers()) else {
            return bad_request_response("Missing Mcp-Session-Id header");
        };

        self.stream_manager.close_session(&session_id);
        match self.storage.delete_session(&session_id).await {
            Ok(removed) => {
                if removed {
                    info!(session_id = %session_id, "Session terminated by client");
                }
                no_content_response()
            }
            Err(e) => {
                error!(session_id = %session_id, "Failed to delete session: {}", e);
                internal_error_response()
            }
        }
    }

    /// `GET /sse`
    pub async fn handle_sse_get(&self) -> McpResponse {
        match self.stream_manager.open_stream().await {
            Ok((_, response)) => response,
            Err(HttpMcpError::Session(SessionStorageError::MaxSessionsReached(limit))) => {
                warn!(limit, "Refusing SSE stream, session limit reached");
                json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &json!({"error": "Too many sessions"}),
                )
            }
            Err(e) => {
                error!("Failed to open SSE stream: {}", e);
                internal_error_response()
            }
        }
    }

    /// `POST /message?sessionId=`: 202 now, the answer travels over the push channel
    pub async fn handle_message_post<B>(&self, req: Request<B>) -> McpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let Some(session_id) =
            extract_query_session_id(req.uri()).or_else(|| extract_session_id(req.headers()))
        else {
            return bad_request_response("Missing sessionId");
        };

        let Some(done) = self
            .stream_manager
            .session_token(&session_id)
            .filter(|_| self.stream_manager.is_open(&session_id))
        else {
            debug!(session_id = %session_id, "POST for unknown or closed stream");
            return bad_request_response("Unknown or closed session");
        };

        match self.storage.get_session(&session_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.stream_manager.close_session(&session_id);
                return bad_request_response("Unknown or closed session");
            }
            Err(e) => {
                warn!(session_id = %session_id, "Session lookup failed: {}", e);
                return bad_request_response("Unknown or closed session");
            }
        }

        let body = match self.read_body(req).await {
            Ok(body) => body,
            Err(response) => return response,
        };
        self.log_incoming(&body);

        let handler = self.clone();
        let push = PushChannel {
            done,
            notifier: self.stream_manager.notifier(&session_id),
        };
        tokio::spawn(async move {
            let outcome = handler
                .dispatch_in_session(&body, Some(session_id.clone()), Some(push))
                .await;
            let Some(output) = outcome.output else {
                return;
            };
            match serde_json::to_string(&output) {
                Ok(json) => {
                    handler.log_outgoing(json.as_bytes());
                    handler
                        .stream_manager
                        .send(&session_id, SseEvent::Message(json));
                }
                Err(e) => error!(session_id = %session_id, "Failed to encode response: {}", e),
            }
        });

        accepted_response()
    }

    async fn dispatch_in_session(
        &self,
        body: &[u8],
        session_id: Option<String>,
        push: Option<PushChannel>,
    ) -> SessionOutcome {
        let incoming = match decode(body) {
            Ok(incoming) => incoming,
            Err(parse_error) => {
                debug!(error = %parse_error, "Failed to decode JSON-RPC body");
                return SessionOutcome::from_output(Some(JsonRpcOutput::Single(
                    JsonRpcMessage::error(parse_error),
                )));
            }
        };

        let session = match &session_id {
            Some(id) => match self.storage.get_session(id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(session_id = %id, "Session lookup failed: {}", e);
                    None
                }
            },
            None => None,
        };

        if incoming.single_method() == Some(methods::INITIALIZE) {
            return self.initialize_in_session(incoming, session, push).await;
        }

        let Some(session) = session else {
            if let Some(id) = &session_id {
                warn!(session_id = %id, "Invalid or expired session");
            }
            return SessionOutcome::rejected(
                &incoming,
                McpError::InvalidSession(session_id.unwrap_or_default()),
            );
        };

        if !session.is_initialized && requires_initialized(&incoming) {
            debug!(session_id = %session.session_id, "Call before initialize");
            return SessionOutcome::rejected(&incoming, McpError::SessionNotInitialized);
        }

        let ctx = self.context(&session.session_id, push);
        SessionOutcome::from_output(self.dispatcher.handle_incoming(incoming, ctx).await)
    }

    async fn initialize_in_session(
        &self,
        incoming: Incoming,
        existing: Option<SessionInfo>,
        push: Option<PushChannel>,
    ) -> SessionOutcome {
        let (session_id, created) = match existing {
            Some(session) => (session.session_id, false),
            None => match self.storage.create_session().await {
                Ok(session) => (session.session_id, true),
                Err(e) => {
                    error!("Failed to create session during initialize: {}", e);
                    let output = incoming.call_ids().into_iter().next().map(|id| {
                        JsonRpcOutput::Single(JsonRpcMessage::error(JsonRpcError::internal_error(
                            id,
                            Some(format!("Session creation failed: {}", e)),
                        )))
                    });
                    return SessionOutcome::from_output(output);
                }
            },
        };

        let ctx = self.context(&session_id, push);
        let output = self.dispatcher.handle_incoming(incoming, ctx).await;

        let initialized = matches!(
            self.storage.get_session(&session_id).await,
            Ok(Some(session)) if session.is_initialized
        );
        if !initialized {
            if created {
                // Never leave a half-made session behind a failed initialize
                if let Err(e) = self.storage.delete_session(&session_id).await {
                    warn!(session_id = %session_id, "Failed to discard session: {}", e);
                }
            }
            return SessionOutcome::from_output(output);
        }

        info!(session_id = %session_id, "Session initialized");
        SessionOutcome {
            status: StatusCode::OK,
            output,
            announce_session: Some(session_id),
        }
    }

    fn context(&self, session_id: &str, push: Option<PushChannel>) -> RequestContext {
        let ctx = RequestContext::new().with_session(session_id);
        match push {
            Some(push) => ctx
                .with_cancellation(push.done)
                .with_notifier(push.notifier),
            None => ctx.with_cancellation(self.shutdown.child_token()),
        }
    }

    fn write_outcome(&self, outcome: SessionOutcome) -> McpResponse {
        match outcome.output {
            Some(output) => {
                if self.config.log_bodies {
                    if let Ok(json) = serde_json::to_string(&output) {
                        self.log_outgoing(json.as_bytes());
                    }
                }
                jsonrpc_output_response(
                    outcome.status,
                    &output,
                    outcome.announce_session.as_deref(),
                )
            }
            None => {
                let mut response = no_content_response();
                if let Some(session_id) = outcome.announce_session.as_deref() {
                    attach_session_header(&mut response, session_id);
                }
                response
            }
        }
    }

    /// Collect the body, refusing anything above `max_body_size` with 413
    pub(crate) async fn read_body<B>(&self, req: Request<B>) -> Result<Bytes, McpResponse>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let limit = self.config.max_body_size;
        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if declared.is_some_and(|length| length > limit) {
            warn!(limit, "Request body too large");
            return Err(payload_too_large_response(limit));
        }

        match Limited::new(req.into_body(), limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                warn!(limit, "Request body too large");
                Err(payload_too_large_response(limit))
            }
            Err(e) => {
                error!("Failed to read request body: {}", e);
                Err(bad_request_response("Failed to read request body"))
            }
        }
    }

    fn log_incoming(&self, body: &[u8]) {
        if self.config.log_bodies {
            debug!(body = %String::from_utf8_lossy(body), "Incoming request body");
        }
    }

    fn log_outgoing(&self, body: &[u8]) {
        if self.config.log_bodies {
            debug!(body = %String::from_utf8_lossy(body), "Outgoing response body");
        }
    }
}
