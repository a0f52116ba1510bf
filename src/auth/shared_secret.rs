//! Shared-secret authentication.
//!
//! The key is taken from `X-API-Key`, falling back to
//! `Authorization: Bearer <key>`, and compared to the configured secret in
//! constant time.

use async_trait::async_trait;
use http::{Extensions, HeaderMap};
use serde_json::Value;
use subtle::ConstantTimeEq;

use super::{AuthError, Authenticator, Claims, bearer_token};

pub(crate) const API_KEY_HEADER: &str = "x-api-key";

pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    fn verify(&self, presented: &str) -> bool {
        presented
            .as_bytes()
            .ct_eq(self.secret.as_bytes())
            .unwrap_u8()
            == 1
    }
}

#[async_trait]
impl Authenticator for SharedSecretAuthenticator {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        _extensions: &Extensions,
    ) -> Result<Claims, AuthError> {
        let presented = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| bearer_token(headers))
            .ok_or(AuthError::MissingCredentials)?;

        if self.verify(presented) {
            // Holding the daemon secret is full trust.
            let mut map = serde_json::Map::new();
            map.insert("role".to_string(), Value::String("admin".to_string()));
            Ok(Claims(map))
        } else {
            Err(AuthError::BadCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::AUTHORIZATION;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[tokio::test]
    async fn accepts_api_key_header() {
        let auth = SharedSecretAuthenticator::new("s3cret".into());
        let h = headers(&[("x-api-key", "s3cret")]);
        assert!(auth.authenticate(&h, &Extensions::new()).await.is_ok());
    }

    #[tokio::test]
    async fn falls_back_to_bearer() {
        let auth = SharedSecretAuthenticator::new("s3cret".into());
        let h = headers(&[(AUTHORIZATION.as_str(), "Bearer s3cret")]);
        assert!(auth.authenticate(&h, &Extensions::new()).await.is_ok());
    }

    #[tokio::test]
    async fn api_key_header_wins_over_bearer() {
        let auth = SharedSecretAuthenticator::new("s3cret".into());
        let h = headers(&[
            ("x-api-key", "wrong"),
            (AUTHORIZATION.as_str(), "Bearer s3cret"),
        ]);
        assert!(matches!(
            auth.authenticate(&h, &Extensions::new()).await,
            Err(AuthError::BadCredentials)
        ));
    }

    #[tokio::test]
    async fn rejects_missing_and_wrong_secrets() {
        let auth = SharedSecretAuthenticator::new("s3cret".into());
        assert!(matches!(
            auth.authenticate(&HeaderMap::new(), &Extensions::new())
                .await,
            Err(AuthError::MissingCredentials)
        ));
        let h = headers(&[("x-api-key", "nope")]);
        assert!(matches!(
            auth.authenticate(&h, &Extensions::new()).await,
            Err(AuthError::BadCredentials)
        ));
    }
}
