//! Request-id assignment and response echo.
//!
//! An inbound `X-Request-Id` is honored after sanitizing: characters outside
//! `[A-Za-z0-9._:/-]` are dropped and the result is truncated to 64. When the
//! header is absent or sanitizes to nothing, a 24-hex random id is generated.
//! The id is stored in request extensions for the envelope and log line, and
//! echoed on the response.

use http::{HeaderValue, header::HeaderName};

use crate::{
    middleware::Next,
    types::{Request, Response},
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_LEN: usize = 64;

/// Correlation id bound to the request context.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Sanitizes a caller-supplied id: strip disallowed characters, cap length.
/// Returns `None` when nothing valid remains.
pub fn sanitize(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'))
        .take(MAX_LEN)
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Generates a fresh 24-hex id; also used for job ids.
pub fn generate() -> String {
    hex::encode(rand::random::<[u8; 12]>())
}

pub async fn apply(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(sanitize)
        .unwrap_or_else(generate);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_clean_ids_through() {
        assert_eq!(sanitize("abc_123"), Some("abc_123".to_string()));
        assert_eq!(sanitize("a.b:c/d-e"), Some("a.b:c/d-e".to_string()));
    }

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(sanitize("abc 123!@#"), Some("abc123".to_string()));
        assert_eq!(sanitize("тест"), None);
    }

    #[test]
    fn truncates_to_sixty_four() {
        let long = "a".repeat(100);
        assert_eq!(sanitize(&long).unwrap().len(), 64);
    }

    #[test]
    fn generated_ids_are_24_hex() {
        let id = generate();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate(), id);
    }
}
