//! Push-channel management for the HTTP+SSE transport
//!
//! Each `GET /sse` connection owns one bounded queue. Producers (`POST /message` tasks and
//! handlers pushing notifications) never wait on it: `try_send` either queues the event or
//! the event is dropped and logged. The stream loop multiplexes the queue, a keep-alive timer
//! and the session's done token; when the body is dropped the session is torn down.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mcp_storage_json_rpc::{JsonRpcNotification, NotificationSink};
use mcp_storage_session::BoxedSessionStorage;

use crate::json_rpc_responses::McpResponse;
use crate::protocol::message_endpoint;
use crate::sse::SseEvent;

/// Configuration for stream management
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Capacity of each session's outbound queue
    pub queue_capacity: usize,
    /// Interval between keep-alive comments
    pub keepalive_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Result of offering an event to a session's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue at capacity; the event was discarded
    Dropped,
    /// The stream has gone away
    Closed,
    /// No push channel was ever registered for the session
    NoChannel,
}

struct SessionChannel {
    sender: mpsc::Sender<SseEvent>,
    done: CancellationToken,
}

/// Registry of open push channels, keyed by session id
pub struct StreamManager {
    storage: Arc<BoxedSessionStorage>,
    channels: RwLock<HashMap<String, SessionChannel>>,
    config: StreamConfig,
    /// Parent of every session's done token
    shutdown: CancellationToken,
}

impl StreamManager {
    pub fn new(
        storage: Arc<BoxedSessionStorage>,
        config: StreamConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            storage,
            channels: RwLock::new(HashMap::new()),
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Allocate a session and return the `text/event-stream` response feeding it
    pub async fn open_stream(self: &Arc<Self>) -> crate::Result<(String, McpResponse)> {
        let session = self.storage.create_session().await?;
        let session_id = session.session_id;

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let done = self.shutdown.child_token();
        self.channels.write().insert(
            session_id.clone(),
            SessionChannel {
                sender,
                done: done.clone(),
            },
        );
        info!(session_id = %session_id, "SSE stream opened");

        let guard = StreamGuard {
            manager: Arc::clone(self),
            session_id: session_id.clone(),
        };
        let stream = event_stream(
            Arc::clone(&self.storage),
            self.config.keepalive_interval,
            guard,
            receiver,
            done,
        );
        Ok((session_id, sse_response(stream)))
    }

    /// Offer an event to a session's queue without waiting
    pub fn send(&self, session_id: &str, event: SseEvent) -> SendOutcome {
        let channels = self.channels.read();
        let Some(channel) = channels.get(session_id) else {
            return SendOutcome::NoChannel;
        };

        match channel.sender.try_send(event) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %session_id, "Outbound queue full, dropping event");
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %session_id, "Outbound queue closed, discarding event");
                SendOutcome::Closed
            }
        }
    }

    pub fn is_open(&self, session_id: &str) -> bool {
        self.channels
            .read()
            .get(session_id)
            .is_some_and(|channel| !channel.sender.is_closed() && !channel.done.is_cancelled())
    }

    /// Done token of an open channel; cancelled when the stream ends
    pub fn session_token(&self, session_id: &str) -> Option<CancellationToken> {
        self.channels
            .read()
            .get(session_id)
            .map(|channel| channel.done.clone())
    }

    /// Notification sink bound to one session's queue
    pub fn notifier(self: &Arc<Self>, session_id: &str) -> Arc<dyn NotificationSink> {
        Arc::new(SessionNotifier {
            manager: Arc::clone(self),
            session_id: session_id.to_string(),
        })
    }

    /// End a session's stream; returns false if none was open
    pub fn close_session(&self, session_id: &str) -> bool {
        match self.channels.write().remove(session_id) {
            Some(channel) => {
                channel.done.cancel();
                true
            }
            None => false,
        }
    }

    pub fn open_count(&self) -> usize {
        self.channels.read().len()
    }
}

/// Tears a session down when its SSE body goes away
struct StreamGuard {
    manager: Arc<StreamManager>,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.manager.close_session(&self.session_id);

        let storage = Arc::clone(&self.manager.storage);
        let session_id = std::mem::take(&mut self.session_id);
        info!(session_id = %session_id, "SSE stream closed");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = storage.delete_session(&session_id).await {
                    warn!(session_id = %session_id, "Failed to delete session: {}", e);
                }
            });
        }
    }
}

struct SessionNotifier {
    manager: Arc<StreamManager>,
    session_id: String,
}

impl NotificationSink for SessionNotifier {
    fn notify(&self, notification: JsonRpcNotification) -> bool {
        match serde_json::to_string(&notification) {
            Ok(json) => {
                self.manager.send(&self.session_id, SseEvent::Message(json)) == SendOutcome::Queued
            }
            Err(e) => {
                warn!(session_id = %self.session_id, "Failed to serialize notification: {}", e);
                false
            }
        }
    }
}

fn event_stream(
    storage: Arc<BoxedSessionStorage>,
    period: Duration,
    guard: StreamGuard,
    mut receiver: mpsc::Receiver<SseEvent>,
    done: CancellationToken,
) -> impl Stream<Item = Result<Frame<Bytes>, Infallible>> + Send + 'static {
    async_stream::stream! {
        // Dropping the body (client disconnect) drops the guard
        let guard = guard;
        let session_id = guard.session_id.clone();

        yield Ok(Frame::data(
            SseEvent::Endpoint(message_endpoint(&session_id)).into_bytes(),
        ));

        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = done.cancelled() => {
                    debug!(session_id = %session_id, "SSE stream cancelled");
                    break;
                }
                event = receiver.recv() => match event {
                    Some(event) => yield Ok(Frame::data(event.into_bytes())),
                    None => break,
                },
                _ = keepalive.tick() => {
                    // Keep-alives count as activity; a swept session ends the stream
                    match storage.get_session(&session_id).await {
                        Ok(Some(_)) => yield Ok(Frame::data(SseEvent::KeepAlive.into_bytes())),
                        Ok(None) => {
                            debug!(session_id = %session_id, "Session expired, closing SSE stream");
                            break;
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, "Session lookup failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        drop(guard);
    }
}

fn sse_response<S>(stream: S) -> McpResponse
where
    S: Stream<Item = Result<Frame<Bytes>, Infallible>> + Send + 'static,
{
    let body = StreamBody::new(stream)
        .map_err(|never| match never {})
        .boxed_unsync();

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mcp_storage_session::{InMemorySessionStorage, SessionStorage};
    use serde_json::json;

    fn manager(config: StreamConfig) -> (Arc<StreamManager>, Arc<BoxedSessionStorage>) {
        let storage: Arc<BoxedSessionStorage> = Arc::new(InMemorySessionStorage::new());
        let manager = Arc::new(StreamManager::new(
            Arc::clone(&storage),
            config,
            CancellationToken::new(),
        ));
        (manager, storage)
    }

    async fn next_frame(body: &mut crate::json_rpc_responses::UnifiedMcpBody) -> String {
        let frame = body.frame().await.unwrap().unwrap();
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_starts_with_endpoint_event() {
        let (manager, _) = manager(StreamConfig::default());
        let (session_id, response) = manager.open_stream().await.unwrap();

        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let mut body = response.into_body();
        assert_eq!(
            next_frame(&mut body).await,
            format!("event: endpoint\ndata: /message?sessionId={}\n\n", session_id)
        );

        assert_eq!(
            manager.send(&session_id, SseEvent::Message("{}".into())),
            SendOutcome::Queued
        );
        assert_eq!(next_frame(&mut body).await, "event: message\ndata: {}\n\n");
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (manager, _) = manager(StreamConfig {
            queue_capacity: 2,
            keepalive_interval: Duration::from_secs(60),
        });
        let (session_id, _response) = manager.open_stream().await.unwrap();

        for _ in 0..2 {
            assert_eq!(
                manager.send(&session_id, SseEvent::Message("{}".into())),
                SendOutcome::Queued
            );
        }
        assert_eq!(
            manager.send(&session_id, SseEvent::Message("{}".into())),
            SendOutcome::Dropped
        );
        assert_eq!(
            manager.send("unknown", SseEvent::KeepAlive),
            SendOutcome::NoChannel
        );
    }

    #[tokio::test]
    async fn test_dropping_body_closes_session() {
        let (manager, storage) = manager(StreamConfig::default());
        let (session_id, response) = manager.open_stream().await.unwrap();
        let token = manager.session_token(&session_id).unwrap();

        let mut body = response.into_body();
        next_frame(&mut body).await;
        drop(body);

        assert!(token.is_cancelled());
        assert!(!manager.is_open(&session_id));

        // Session deletion runs on a spawned task
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(storage.get_session(&session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keepalive_and_notifications() {
        let (manager, _) = manager(StreamConfig {
            queue_capacity: 8,
            keepalive_interval: Duration::from_millis(30),
        });
        let (session_id, response) = manager.open_stream().await.unwrap();
        let mut body = response.into_body();
        next_frame(&mut body).await;

        assert_eq!(next_frame(&mut body).await, ": keepalive\n\n");

        let notifier = manager.notifier(&session_id);
        assert!(notifier.notify(JsonRpcNotification::new(
            "notifications/progress",
            Some(json!({"progressToken": "t", "progress": 1}))
        )));
        let frame = next_frame(&mut body).await;
        assert!(frame.starts_with("event: message\ndata: "));
        assert!(frame.contains("notifications/progress"));
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let storage: Arc<BoxedSessionStorage> = Arc::new(InMemorySessionStorage::new());
        let shutdown = CancellationToken::new();
        let manager = Arc::new(StreamManager::new(
            storage,
            StreamConfig::default(),
            shutdown.clone(),
        ));
        let (_, response) = manager.open_stream().await.unwrap();

        let mut frames = response.into_body().into_data_stream();
        assert!(frames.next().await.is_some());

        shutdown.cancel();
        assert!(frames.next().await.is_none());
        assert_eq!(manager.open_count(), 0);
    }
}
