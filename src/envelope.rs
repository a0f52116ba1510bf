//! Uniform JSON response envelope.
//!
//! Every JSON response is either
//! `{"success":true,"timestamp":…,"request_id":…,…payload}` or
//! `{"success":false,"timestamp":…,"request_id":…,"error":…,"error_code":…,"details"?,"hint"?}`.
//! The request id comes from the extension planted by the request-id
//! middleware, so handlers never thread it manually.

use chrono::{SecondsFormat, Utc};
use http::{StatusCode, header};
use serde_json::{Value, json};

use crate::{
    body::MuxBody,
    middleware::request_id::RequestId,
    types::{Request, Response},
};

/// Enumerated error codes exposed in the `error_code` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    InternalError,
    ServiceUnavailable,
    IdempotentReplay,
    JobPending,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Conflict => "CONFLICT",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::IdempotentReplay => "IDEMPOTENT_REPLAY",
            Self::JobPending => "JOB_PENDING",
        }
    }

    /// Default HTTP status carried by this code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::IdempotentReplay => StatusCode::OK,
            Self::JobPending => StatusCode::ACCEPTED,
        }
    }
}

/// RFC 3339 timestamp with nanosecond precision, as used on the wire.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

fn render(status: StatusCode, body: Value) -> Response {
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    let mut res = hyper::Response::new(MuxBody::from(bytes));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    res
}

/// 200 success envelope with `payload`'s fields merged in.
pub fn success(req: &Request, payload: Value) -> Response {
    success_with_status(req, StatusCode::OK, payload)
}

/// Success envelope with an explicit status (e.g. 202 for accepted jobs).
pub fn success_with_status(req: &Request, status: StatusCode, payload: Value) -> Response {
    let mut body = json!({
        "success": true,
        "timestamp": now_rfc3339(),
        "request_id": request_id_of(req),
    });
    if let (Value::Object(envelope), Value::Object(fields)) = (&mut body, payload) {
        for (k, v) in fields {
            envelope.insert(k, v);
        }
    }
    render(status, body)
}

/// Error envelope with the code's default status.
pub fn failure(req: &Request, code: ErrorCode, message: &str) -> Response {
    failure_with(req, code, message, None, None)
}

/// Error envelope built from a bare request id, for paths where the request
/// has already been consumed (panic recovery).
pub(crate) fn failure_for_id(request_id: &str, code: ErrorCode, message: &str) -> Response {
    let body = json!({
        "success": false,
        "timestamp": now_rfc3339(),
        "request_id": request_id,
        "error": message,
        "error_code": code.as_str(),
    });
    render(code.status(), body)
}

/// Error envelope with optional `details` and `hint` fields.
pub fn failure_with(
    req: &Request,
    code: ErrorCode,
    message: &str,
    details: Option<Value>,
    hint: Option<Value>,
) -> Response {
    let mut body = json!({
        "success": false,
        "timestamp": now_rfc3339(),
        "request_id": request_id_of(req),
        "error": message,
        "error_code": code.as_str(),
    });
    if let Value::Object(envelope) = &mut body {
        if let Some(details) = details {
            envelope.insert("details".to_string(), details);
        }
        if let Some(hint) = hint {
            envelope.insert("hint".to_string(), hint);
        }
    }
    render(code.status(), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn request_with_id(id: &str) -> Request {
        let mut req = http::Request::builder()
            .uri("/api/v1/health")
            .body(MuxBody::empty())
            .unwrap();
        req.extensions_mut().insert(RequestId(id.to_string()));
        req
    }

    async fn body_json(res: Response) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_merges_payload_fields() {
        let req = request_with_id("req-1");
        let res = success(&req, json!({"status": "healthy"}));
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["request_id"], "req-1");
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn failure_carries_code_and_details() {
        let req = request_with_id("req-2");
        let res = failure_with(
            &req,
            ErrorCode::Forbidden,
            "permission denied",
            Some(json!({"required_permission": "write-jobs"})),
            None,
        );
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body = body_json(res).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "FORBIDDEN");
        assert_eq!(body["details"]["required_permission"], "write-jobs");
        assert!(body.get("hint").is_none());
    }

    #[test]
    fn error_codes_round_trip_to_strings() {
        assert_eq!(ErrorCode::MethodNotAllowed.as_str(), "METHOD_NOT_ALLOWED");
        assert_eq!(ErrorCode::IdempotentReplay.as_str(), "IDEMPOTENT_REPLAY");
        assert_eq!(ErrorCode::JobPending.status(), StatusCode::ACCEPTED);
    }
}
