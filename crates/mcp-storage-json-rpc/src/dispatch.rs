use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::codec::{self, Incoming, JsonRpcOutput};
use crate::error::{JsonRpcError, JsonRpcErrorObject};
use crate::notification::JsonRpcNotification;
use crate::request::{JsonRpcRequest, RequestParams};
use crate::response::JsonRpcMessage;
use crate::types::RequestId;

/// Written when even the error envelope cannot be serialized
const FALLBACK_INTERNAL_ERROR: &[u8] =
    br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// Receives server-originated notifications for the caller's session (push channel)
pub trait NotificationSink: Send + Sync {
    /// Returns false when the notification could not be queued
    fn notify(&self, notification: JsonRpcNotification) -> bool;
}

/// Per-call context handed to every handler
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Session bound to this call, if the transport tracks sessions
    pub session_id: Option<String>,
    /// Cancelled on client disconnect, session close or shutdown
    pub cancellation: CancellationToken,
    /// Outbound channel of the bound session
    pub notifier: Option<Arc<dyn NotificationSink>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Push a notification to the bound session; false if there is no channel or it is full
    pub fn notify(&self, method: &str, params: Option<Value>) -> bool {
        match &self.notifier {
            Some(notifier) => notifier.notify(JsonRpcNotification::new(method, params)),
            None => false,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}

/// Trait for handling JSON-RPC method calls
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    /// The error type returned by this handler
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handle a call or notification; the dispatcher decides whether anything is written back
    async fn handle(
        &self,
        method: &str,
        params: Option<RequestParams>,
        ctx: RequestContext,
    ) -> Result<Value, Self::Error>;

    /// List supported methods (used by `register_handler`)
    fn supported_methods(&self) -> Vec<String> {
        vec![]
    }
}

/// Trait for errors that can be converted to JSON-RPC error objects.
///
/// The default is the generic-failure mapping: -32603 with the error's message as `data`.
pub trait ToJsonRpcError: std::error::Error + Send + Sync + 'static {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject::internal_error(Some(self.to_string()))
    }
}

/// JSON-RPC method dispatcher with specific error type
pub struct JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    handlers: HashMap<String, Arc<dyn JsonRpcHandler<Error = E>>>,
}

impl<E> JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a method; an existing registration is replaced
    pub fn register_method<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.insert(method.into(), Arc::new(handler));
    }

    /// Register one handler for multiple methods
    pub fn register_methods<H>(&mut self, methods: Vec<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        let handler_arc: Arc<dyn JsonRpcHandler<Error = E>> = Arc::new(handler);
        for method in methods {
            self.insert(method, handler_arc.clone());
        }
    }

    /// Register a handler under every method it reports in `supported_methods`
    pub fn register_handler<H>(&mut self, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        let methods = handler.supported_methods();
        self.register_methods(methods, handler);
    }

    fn insert(&mut self, method: String, handler: Arc<dyn JsonRpcHandler<Error = E>>) {
        if self.handlers.insert(method.clone(), handler).is_some() {
            debug!(method = %method, "Replaced JSON-RPC handler");
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Get all registered methods
    pub fn registered_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Process one request; `None` for notifications whatever the outcome
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: RequestContext,
    ) -> Option<JsonRpcMessage> {
        let JsonRpcRequest {
            version,
            id,
            method,
            params,
        } = request;

        if version != crate::JSONRPC_VERSION {
            return match id {
                Some(id) => Some(JsonRpcMessage::error(JsonRpcError::invalid_request(
                    id,
                    "JSON-RPC version must be 2.0",
                ))),
                None => {
                    warn!(
                        method = %method,
                        version = %version,
                        "Dropping notification with invalid JSON-RPC version"
                    );
                    None
                }
            };
        }

        let Some(handler) = self.handlers.get(&method) else {
            return match id {
                Some(id) => {
                    debug!(method = %method, "Method not found");
                    Some(JsonRpcMessage::error(JsonRpcError::method_not_found(
                        id, &method,
                    )))
                }
                None => {
                    debug!(method = %method, "Ignoring notification for unregistered method");
                    None
                }
            };
        };

        let outcome = handler.handle(&method, params, ctx).await;

        match (id, outcome) {
            (Some(id), Ok(result)) => Some(JsonRpcMessage::success(id, result)),
            (Some(id), Err(domain_error)) => {
                let error_object = domain_error.to_error_object();
                debug!(method = %method, error = %error_object, "Handler returned error");
                Some(JsonRpcMessage::error(JsonRpcError::new(id, error_object)))
            }
            (None, Ok(_)) => None,
            (None, Err(domain_error)) => {
                warn!(method = %method, error = %domain_error, "Notification handler failed");
                None
            }
        }
    }

    /// Process a decoded body (single request or batch)
    pub async fn handle_incoming(
        &self,
        incoming: Incoming,
        ctx: RequestContext,
    ) -> Option<JsonRpcOutput> {
        match incoming {
            Incoming::Single(request) => self
                .handle_request(request, ctx)
                .await
                .map(JsonRpcOutput::Single),
            Incoming::Invalid(error) => Some(JsonRpcOutput::Single(JsonRpcMessage::error(error))),
            Incoming::Batch(items) if items.is_empty() => {
                Some(JsonRpcOutput::Single(JsonRpcMessage::error(
                    JsonRpcError::invalid_request(RequestId::Null, "Batch cannot be empty"),
                )))
            }
            Incoming::Batch(items) => {
                let responses = join_all(items.into_iter().map(|item| {
                    let ctx = ctx.clone();
                    async move {
                        match item {
                            Ok(request) => self.handle_request(request, ctx).await,
                            Err(error) => Some(JsonRpcMessage::error(error)),
                        }
                    }
                }))
                .await;

                let responses: Vec<JsonRpcMessage> = responses.into_iter().flatten().collect();
                if responses.is_empty() {
                    None
                } else {
                    Some(JsonRpcOutput::Batch(responses))
                }
            }
        }
    }

    /// Raw body in, raw body out; `None` means nothing must be written
    pub async fn handle_bytes(&self, body: &[u8], ctx: RequestContext) -> Option<Vec<u8>> {
        let output = match codec::decode(body) {
            Ok(incoming) => self.handle_incoming(incoming, ctx).await?,
            Err(parse_error) => {
                debug!(error = %parse_error, "Failed to decode JSON-RPC body");
                JsonRpcOutput::Single(JsonRpcMessage::error(parse_error))
            }
        };

        match codec::encode(&output) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(error = %e, "Failed to encode JSON-RPC response");
                Some(FALLBACK_INTERNAL_ERROR.to_vec())
            }
        }
    }
}

impl<E> Default for JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    fn default() -> Self {
        Self::new()
    }
}
