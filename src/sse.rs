//! Server-Sent Events channel.
//!
//! Each `GET /events` connection gets a bounded queue (capacity 100)
//! registered with the broadcaster. Events are written as
//! `event: <type>\ndata: <json>\n\n` frames; a full queue drops the event
//! for that client rather than blocking the broadcaster. Deregistration is
//! tied to the response body's lifetime, so a disconnecting client cleans
//! itself up, and server shutdown closes every queue to end the streams.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt, stream};
use http::{HeaderValue, header};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    body::MuxBody,
    envelope::now_rfc3339,
    middleware::request_id,
    types::{Request, Response},
};

pub const SSE_QUEUE_CAPACITY: usize = 100;

/// One event as delivered to SSE clients.
#[derive(Clone, Debug)]
pub struct SseEvent {
    pub event_type: String,
    pub data: Value,
}

/// Fan-out point for SSE subscribers.
#[derive(Default)]
pub struct SseBroadcaster {
    clients: DashMap<String, mpsc::Sender<SseEvent>>,
}

impl SseBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn subscribe_with_capacity(&self, capacity: usize) -> (String, mpsc::Receiver<SseEvent>) {
        let id = request_id::generate();
        let (tx, rx) = mpsc::channel(capacity);
        self.clients.insert(id.clone(), tx);
        tracing::debug!(client = %id, "sse client connected");
        (id, rx)
    }

    pub fn subscribe(&self) -> (String, mpsc::Receiver<SseEvent>) {
        self.subscribe_with_capacity(SSE_QUEUE_CAPACITY)
    }

    pub fn unsubscribe(&self, id: &str) {
        if self.clients.remove(id).is_some() {
            tracing::debug!(client = %id, "sse client disconnected");
        }
    }

    /// Best-effort delivery to every connected client.
    pub fn broadcast(&self, event: SseEvent) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(client = %entry.key(), "sse queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => dead.push(entry.key().clone()),
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Closes all queues; in-flight streams end after draining.
    pub fn shutdown(&self) {
        self.clients.clear();
    }
}

/// Formats one wire frame.
fn format_frame(event_type: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {event_type}\ndata: {data}\n\n"))
}

struct Deregister {
    id: String,
    broadcaster: Arc<SseBroadcaster>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.id);
    }
}

/// Builds the frame stream for one client: an initial `connected` event,
/// then broadcast events until the queue closes or the body is dropped.
pub fn event_stream(broadcaster: Arc<SseBroadcaster>) -> impl Stream<Item = Bytes> + Send {
    let (id, rx) = broadcaster.subscribe();
    let guard = Deregister {
        id,
        broadcaster: broadcaster.clone(),
    };

    let connected = format_frame("connected", &json!({"time": now_rfc3339()}));
    // The guard lives inside the map closure, so dropping the body (client
    // gone, or server draining) deregisters the queue.
    let events = ReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        format_frame(&event.event_type, &event.data)
    });

    stream::once(std::future::ready(connected)).chain(events)
}

/// `GET /events` handler.
pub async fn handler(_req: Request, broadcaster: Arc<SseBroadcaster>) -> Response {
    let frames = event_stream(broadcaster).map(Ok::<_, std::convert::Infallible>);

    let mut res = hyper::Response::new(MuxBody::from_stream(frames));
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    res
}
