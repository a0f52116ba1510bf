//! Idempotent-replay middleware, attached to mutating routes only.
//!
//! On `POST`/`PUT`/`DELETE` with an `Idempotency-Key` header, a cache hit
//! replays the original status and body byte-for-byte with
//! `X-Idempotent-Replay: true`. On a miss the response is buffered and, when
//! the status is 2xx and the body fits the cap, stored for the TTL. Non-2xx
//! responses pass through uncached so transient failures are never pinned.

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use http::{HeaderValue, Method, header::CONTENT_TYPE};
use http_body_util::BodyExt;

use crate::{
    body::MuxBody,
    idempotency::{IdempotencyCache, MAX_CACHED_BODY},
    middleware::{IntoMiddleware, Next},
    types::{Request, Response},
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "x-idempotent-replay";

#[derive(Clone)]
pub struct IdempotencyLayer {
    cache: Arc<IdempotencyCache>,
}

impl IdempotencyLayer {
    pub fn new(cache: Arc<IdempotencyCache>) -> Self {
        Self { cache }
    }
}

fn replay(status: http::StatusCode, body: Bytes) -> Response {
    let mut res = hyper::Response::new(MuxBody::from(body));
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    res.headers_mut().insert(
        http::header::HeaderName::from_static(REPLAY_HEADER),
        HeaderValue::from_static("true"),
    );
    res
}

impl IntoMiddleware for IdempotencyLayer {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static {
        move |req: Request, next: Next| {
            let cache = self.cache.clone();

            Box::pin(async move {
                if !matches!(*req.method(), Method::POST | Method::PUT | Method::DELETE) {
                    return next.run(req).await;
                }
                let key = match req
                    .headers()
                    .get(IDEMPOTENCY_KEY_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .filter(|k| !k.is_empty())
                {
                    Some(key) => key,
                    None => return next.run(req).await,
                };

                if let Some((status, body)) = cache.get(&key) {
                    tracing::debug!(%key, "idempotent replay");
                    return replay(status, body);
                }

                let res = next.run(req).await;

                // Buffer the whole body so the stored bytes match what this
                // caller receives.
                let (parts, body) = res.into_parts();
                let collected = match body.collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(_) => Bytes::new(),
                };

                if parts.status.is_success() && collected.len() <= MAX_CACHED_BODY {
                    cache.insert(key, parts.status, collected.clone());
                }

                hyper::Response::from_parts(parts, MuxBody::from(collected))
            })
        }
    }
}
