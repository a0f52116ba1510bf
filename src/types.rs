//! Core type aliases used throughout the daemon.
//!
//! The whole pipeline operates on `http::Request<MuxBody>` / `hyper::Response<MuxBody>`.
//! Incoming hyper bodies are boxed into [`MuxBody`] at the connection boundary
//! (see `server.rs`), which keeps middleware and handlers uniform and lets the
//! test suite drive the router with hand-built requests instead of sockets.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::combinators::UnsyncBoxBody;

use crate::{body::MuxBody, middleware::Next};

/// HTTP request as seen by middleware and handlers.
pub type Request = http::Request<MuxBody>;

/// HTTP response produced by middleware and handlers.
pub type Response = hyper::Response<MuxBody>;

/// Boxed body backing [`MuxBody`].
pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// Boxed error that can cross task boundaries.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed middleware function, shared across the route table.
pub type BoxMiddleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;
