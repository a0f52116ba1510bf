//! HTTP body wrapper shared by requests and responses.
//!
//! `MuxBody` boxes any hyper body into a single concrete type so routes,
//! middleware and tests all trade in the same request/response shape. The
//! server wraps `hyper::body::Incoming` at the connection boundary; tests
//! build bodies from bytes directly.

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::{TryStream, TryStreamExt};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// Unified request/response body.
pub struct MuxBody(BoxBody);

impl MuxBody {
    /// Boxes any body implementation with `Bytes` data.
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed_unsync())
    }

    /// Creates an empty body.
    pub fn empty() -> Self {
        Self::new(Empty::new())
    }

    /// Creates a streaming body from a stream of byte chunks.
    ///
    /// Used by the SSE channel, where each yielded chunk is one wire frame.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: TryStream + Send + 'static,
        S::Ok: Into<Bytes>,
        S::Error: Into<BoxError>,
    {
        Self::new(StreamBody::new(
            stream
                .map_ok(|chunk| Frame::data(chunk.into()))
                .map_err(Into::into),
        ))
    }
}

impl Body for MuxBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }
}

impl Debug for MuxBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MuxBody")
    }
}

impl Default for MuxBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for MuxBody {
    fn from(value: String) -> Self {
        Self::new(http_body_util::Full::from(Bytes::from(value)))
    }
}

impl From<&'static str> for MuxBody {
    fn from(value: &'static str) -> Self {
        Self::new(http_body_util::Full::from(Bytes::from_static(
            value.as_bytes(),
        )))
    }
}

impl From<Bytes> for MuxBody {
    fn from(value: Bytes) -> Self {
        Self::new(http_body_util::Full::from(value))
    }
}

impl From<Vec<u8>> for MuxBody {
    fn from(value: Vec<u8>) -> Self {
        Self::new(http_body_util::Full::from(Bytes::from(value)))
    }
}
