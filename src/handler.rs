//! Request handler trait and boxing.
//!
//! Handlers are async closures over [`Request`]. Shared services (registry,
//! hub, caches) reach handlers by closure capture, so no extractor machinery
//! or global state map is involved.

use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::future::BoxFuture;

use crate::{
    responder::Responder,
    types::{Request, Response},
};

/// A callable that turns a request into a response.
pub trait Handler: Clone + Send + Sync + 'static {
    type Future: Future<Output = Response> + Send + 'static;

    fn call(self, req: Request) -> Self::Future;
}

impl<F, Fut, R> Handler for F
where
    F: FnOnce(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, req: Request) -> Self::Future {
        Box::pin(async move { (self)(req).await.into_response() })
    }
}

/// Type-erased handler stored in the route table.
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>,
}

impl BoxHandler {
    pub fn new<H>(handler: H) -> Self
    where
        H: Handler,
    {
        let inner = Arc::new(move |req: Request| {
            let handler = handler.clone();
            Box::pin(async move { handler.call(req).await }) as BoxFuture<'static, Response>
        });

        Self { inner }
    }

    pub(crate) fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        (self.inner)(req)
    }
}
