//! In-process event bus.
//!
//! Producers (job executor, pane collectors, domain commands) emit typed
//! events; subscribers register async handlers that run concurrently per
//! emit. The event bridge is the bus's one standing subscriber and fans
//! events into the SSE broadcaster and the subscription hub.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use serde_json::Value;

/// One event on the bus.
#[derive(Clone, Debug)]
pub struct Event {
    /// Kind, e.g. `session_created`, `pane_output`, `job_status`.
    pub event_type: String,
    /// Session the event belongs to, when it has one; drives topic routing.
    pub session: Option<String>,
    /// Arbitrary JSON payload.
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, session: Option<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            session,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Boxed async event handler.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Inner {
    handlers: RwLock<Vec<EventHandler>>,
}

/// Shared bus handle.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, invoked for every subsequent emit.
    pub fn on<F, Fut>(&self, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event: Event| {
            let fut = handler(event);
            Box::pin(async move { fut.await })
        });
        self.inner.handlers.write().push(handler);
    }

    /// Emits an event; handlers run concurrently and this resolves once all
    /// of them have completed.
    pub async fn emit(&self, event: Event) {
        let handlers = self.inner.handlers.read().clone();
        let futures = handlers.into_iter().map(|handler| handler(event.clone()));
        let _ = join_all(futures).await;
    }
}
