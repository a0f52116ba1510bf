//! Conversion of handler return values into HTTP responses.
//!
//! Handlers return `impl Responder`; the router boxes the conversion. Most
//! routes build their responses through `envelope`, so only a small set of
//! impls is needed here.

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;

use crate::body::MuxBody;

/// Trait for converting values into HTTP responses.
pub trait Responder {
    fn into_response(self) -> Response<MuxBody>;
}

impl Responder for Response<MuxBody> {
    fn into_response(self) -> Response<MuxBody> {
        self
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response<MuxBody> {
        Response::new(MuxBody::new(Full::from(Bytes::from_static(self.as_bytes()))))
    }
}

impl Responder for String {
    fn into_response(self) -> Response<MuxBody> {
        Response::new(MuxBody::new(Full::from(Bytes::from(self))))
    }
}

impl Responder for () {
    fn into_response(self) -> Response<MuxBody> {
        Response::new(MuxBody::empty())
    }
}

impl Responder for StatusCode {
    fn into_response(self) -> Response<MuxBody> {
        let mut res = Response::new(MuxBody::empty());
        *res.status_mut() = self;
        res
    }
}

impl<T> Responder for (StatusCode, T)
where
    T: Responder,
{
    fn into_response(self) -> Response<MuxBody> {
        let mut res = self.1.into_response();
        *res.status_mut() = self.0;
        res
    }
}
