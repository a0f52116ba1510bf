//! CORS enforcement against the shared origin allowlist.
//!
//! Requests carrying an `Origin` header are rejected with 403 unless the
//! origin matches the active policy; matches are echoed back with
//! `Access-Control-Allow-Origin` and `Vary: Origin`. `OPTIONS` requests
//! short-circuit with 200 and the advertised methods/headers. The policy
//! handle is shared with the WebSocket upgrade path, which performs the same
//! check because this middleware never sees upgrades.

use std::{future::Future, pin::Pin};

use http::{
    HeaderValue, Method, StatusCode,
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_MAX_AGE, ORIGIN, VARY,
    },
};

use crate::{
    body::MuxBody,
    envelope::{self, ErrorCode},
    middleware::{IntoMiddleware, Next},
    origin::OriginPolicyHandle,
    types::{Request, Response},
};

const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOW_HEADERS: &str =
    "Content-Type, Authorization, X-API-Key, X-Request-Id, Idempotency-Key, Last-Event-ID";
const MAX_AGE_SECS: &str = "3600";

#[derive(Clone)]
pub struct CorsLayer {
    policy: OriginPolicyHandle,
}

impl CorsLayer {
    pub fn new(policy: OriginPolicyHandle) -> Self {
        Self { policy }
    }
}

fn apply_origin_headers(res: &mut Response, origin: &HeaderValue) {
    res.headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    res.headers_mut()
        .insert(VARY, HeaderValue::from_static("Origin"));
}

fn preflight(origin: Option<&HeaderValue>) -> Response {
    let mut res = hyper::Response::new(MuxBody::empty());
    *res.status_mut() = StatusCode::OK;
    res.headers_mut().insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    res.headers_mut().insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    res.headers_mut().insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(MAX_AGE_SECS),
    );
    if let Some(origin) = origin {
        apply_origin_headers(&mut res, origin);
    }
    res
}

impl IntoMiddleware for CorsLayer {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static {
        move |req: Request, next: Next| {
            let policy = self.policy.clone();

            Box::pin(async move {
                let origin = req.headers().get(ORIGIN).cloned();

                if let Some(origin) = &origin {
                    let allowed = origin
                        .to_str()
                        .map(|o| policy.load().allows(o))
                        .unwrap_or(false);
                    if !allowed {
                        tracing::warn!(origin = ?origin, "rejected disallowed origin");
                        return envelope::failure(
                            &req,
                            ErrorCode::Forbidden,
                            "origin not allowed",
                        );
                    }
                }

                if req.method() == Method::OPTIONS {
                    return preflight(origin.as_ref());
                }

                let mut res = next.run(req).await;
                if let Some(origin) = &origin {
                    apply_origin_headers(&mut res, origin);
                }
                res
            })
        }
    }
}
