//! HTTP route handlers.
//!
//! Handlers receive the request plus the assembled [`App`](crate::app::App)
//! and answer in the uniform envelope. Domain behavior is always reached
//! through the opaque command layer; these functions own only the transport
//! contract.

use std::{future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use serde_json::{Value, json};

use crate::{
    app::App,
    commands::CommandError,
    envelope::{self, ErrorCode},
    params::PathParams,
    types::{Request, Response},
};

pub mod jobs;
pub mod sessions;
pub mod system;

/// A cloneable handler over `(Request, Arc<App>)`.
pub trait AppHandler: Clone + Send + Sync + 'static {
    fn call(self, req: Request, app: Arc<App>) -> BoxFuture<'static, Response>;
}

impl<F, Fut> AppHandler for F
where
    F: FnOnce(Request, Arc<App>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(self, req: Request, app: Arc<App>) -> BoxFuture<'static, Response> {
        Box::pin(self(req, app))
    }
}

/// Reads and parses the request body as JSON. An empty body parses to
/// `Value::Null`; malformed JSON is a 400 with the parse error in details.
pub(crate) async fn read_json(req: &mut Request) -> Result<Value, Response> {
    let body = std::mem::take(req.body_mut());
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return Err(envelope::failure(
                req,
                ErrorCode::BadRequest,
                "unreadable request body",
            ));
        }
    };
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|err| {
        envelope::failure_with(
            req,
            ErrorCode::BadRequest,
            "invalid JSON body",
            Some(json!({"parse_error": err.to_string()})),
            None,
        )
    })
}

/// Path parameter lookup; the router guarantees presence for matched
/// patterns, so a miss is a bad route table rather than caller error.
pub(crate) fn path_param(req: &Request, name: &str) -> Option<String> {
    req.extensions()
        .get::<PathParams>()
        .and_then(|params| params.get(name))
        .map(str::to_string)
}

/// Maps a command-layer result into an envelope response.
pub(crate) fn command_response(req: &Request, result: Result<Value, CommandError>) -> Response {
    match result {
        Ok(Value::Object(fields)) => envelope::success(req, Value::Object(fields)),
        Ok(other) => envelope::success(req, json!({"result": other})),
        Err(err) => command_failure(req, err),
    }
}

pub(crate) fn command_failure(req: &Request, err: CommandError) -> Response {
    match &err {
        CommandError::NotFound(what) => {
            envelope::failure(req, ErrorCode::NotFound, &format!("{what} not found"))
        }
        CommandError::InvalidParams(message) => envelope::failure_with(
            req,
            ErrorCode::BadRequest,
            "invalid parameters",
            Some(json!({"reason": message})),
            None,
        ),
        CommandError::Unknown(name) => envelope::failure_with(
            req,
            ErrorCode::ServiceUnavailable,
            "operation not available in this deployment",
            Some(json!({"command": name})),
            None,
        ),
        CommandError::Failed(message) => {
            tracing::error!(error = %message, "command failed");
            envelope::failure(req, ErrorCode::InternalError, "operation failed")
        }
    }
}
