//! Panic isolation.
//!
//! A panicking handler must not take the server down or leak internals to the
//! client: the payload and a captured stack are logged with the request id,
//! and the caller gets a plain 500 envelope.

use std::backtrace::Backtrace;

use futures_util::FutureExt;

use crate::{
    envelope::{self, ErrorCode},
    middleware::Next,
    middleware::request_id::RequestId,
    types::{Request, Response},
};

pub async fn apply(req: Request, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match std::panic::AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let backtrace = Backtrace::force_capture();
            tracing::error!(
                %method,
                %path,
                %request_id,
                %reason,
                %backtrace,
                "handler panicked"
            );
            envelope::failure_for_id(&request_id, ErrorCode::InternalError, "internal server error")
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;

    use crate::{body::MuxBody, middleware::request_id, router::Router, types::Request};

    fn panicking_router() -> Router {
        let mut router = Router::new();
        router.middleware(request_id::apply);
        router.middleware(super::apply);
        router.route(Method::GET, "/boom", |_req: Request| async move {
            if std::hint::black_box(true) {
                panic!("kaboom");
            }
            "unreachable"
        });
        router.route(Method::GET, "/ok", |_req: Request| async { "fine" });
        router
    }

    #[tokio::test]
    async fn panic_becomes_500_envelope_and_server_survives() {
        let router = panicking_router();

        let req = http::Request::builder()
            .method(Method::GET)
            .uri("/boom")
            .header("x-request-id", "boom-1")
            .body(MuxBody::empty())
            .unwrap();
        let res = router.dispatch(req).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers().get("x-request-id").unwrap(), "boom-1");

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error_code"], "INTERNAL_ERROR");
        assert_eq!(body["request_id"], "boom-1");
        // No stack traces or panic payloads leak to the client.
        assert_eq!(body["error"], "internal server error");

        // The router keeps serving afterwards.
        let req = http::Request::builder()
            .method(Method::GET)
            .uri("/ok")
            .body(MuxBody::empty())
            .unwrap();
        let res = router.dispatch(req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
