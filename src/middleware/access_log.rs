//! Access logging and client address extraction.
//!
//! The real client address is taken from forwarding headers when present
//! (`X-Forwarded-For` first, then `X-Real-Ip`), falling back to the socket
//! peer stored by the server. One line per request: method, path, status,
//! elapsed time, request id, client.

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::{
    middleware::Next,
    middleware::request_id::RequestId,
    types::{Request, Response},
};

/// Best-known client address for the request.
#[derive(Clone, Debug)]
pub struct ClientAddr(pub String);

fn forwarded_client(req: &Request) -> Option<String> {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

pub async fn apply(mut req: Request, next: Next) -> Response {
    let client = forwarded_client(&req).or_else(|| {
        req.extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
    });
    if let Some(client) = &client {
        req.extensions_mut().insert(ClientAddr(client.clone()));
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let start = Instant::now();
    let res = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = res.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        %request_id,
        client = client.as_deref().unwrap_or("-"),
        "request"
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::MuxBody;

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("/health");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(MuxBody::empty()).unwrap()
    }

    #[test]
    fn prefers_first_forwarded_hop() {
        let req = request_with(&[("x-forwarded-for", "10.1.2.3, 172.16.0.1")]);
        assert_eq!(forwarded_client(&req).as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn falls_back_to_real_ip() {
        let req = request_with(&[("x-real-ip", "10.9.8.7")]);
        assert_eq!(forwarded_client(&req).as_deref(), Some("10.9.8.7"));
    }

    #[test]
    fn absent_headers_yield_none() {
        let req = request_with(&[]);
        assert_eq!(forwarded_client(&req), None);
    }
}
