//! Authentication: mode dispatch behind a single trait.
//!
//! The pipeline is generic over [`Authenticator`]; the concrete mode
//! (shared-secret, signed-token, mutual-cert) is chosen once at startup from
//! configuration. `local` mode has no authenticator at all — the auth
//! middleware is bypassed and the authorizer assigns the anonymous role.
//!
//! All failures fold to a 401 `UNAUTHORIZED` externally; the specific reason
//! is logged, never exposed.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Extensions, HeaderMap};
use serde_json::Value;

pub mod keys;
pub mod roles;
pub mod shared_secret;
pub mod token;

pub use keys::KeyCache;
pub use shared_secret::SharedSecretAuthenticator;
pub use token::SignedTokenAuthenticator;

use crate::config::{AuthConfig, AuthMode};

/// Decoded identity attached to an authenticated request.
///
/// An open mapping from claim name to value; the authorizer only interprets
/// `role` / `roles` / `groups`, everything else is carried opaquely (and
/// handed to the subscription ACL hook).
#[derive(Clone, Debug, Default)]
pub struct Claims(pub serde_json::Map<String, Value>);

impl Claims {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Why authentication failed. Logged, folded to `UNAUTHORIZED` on the wire.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid credentials")]
    BadCredentials,
    #[error("token rejected: {0}")]
    Token(String),
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("key fetch failed: {0}")]
    KeyFetch(String),
    #[error("client certificate required")]
    CertificateRequired,
}

/// Mode-independent authentication interface.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        extensions: &Extensions,
    ) -> Result<Claims, AuthError>;
}

/// Peer identity established by the TLS layer for mutual-cert mode; inserted
/// into request extensions per connection. The identity is the certificate
/// fingerprint, stable across reconnects of the same client.
#[derive(Clone, Debug)]
pub struct PeerIdentity {
    pub fingerprint: String,
}

/// Mutual-certificate mode: the transport already verified the chain against
/// the configured trust anchor, so authentication reduces to "a verified peer
/// identity is present on this connection".
pub struct MutualCertAuthenticator;

#[async_trait]
impl Authenticator for MutualCertAuthenticator {
    async fn authenticate(
        &self,
        _headers: &HeaderMap,
        extensions: &Extensions,
    ) -> Result<Claims, AuthError> {
        let peer = extensions
            .get::<PeerIdentity>()
            .ok_or(AuthError::CertificateRequired)?;
        // A certificate chained to the configured anchor is full trust, like
        // the shared secret.
        let mut map = serde_json::Map::new();
        map.insert("sub".to_string(), Value::String(peer.fingerprint.clone()));
        map.insert("role".to_string(), Value::String("admin".to_string()));
        Ok(Claims(map))
    }
}

/// Builds the authenticator for the configured mode.
///
/// Returns `None` for `local` mode (the pipeline skips the auth stage
/// entirely). Configuration errors — missing secret, missing issuer — are
/// fatal here rather than at first request.
pub fn build(config: &AuthConfig) -> anyhow::Result<Option<Arc<dyn Authenticator>>> {
    match config.mode {
        AuthMode::Local => Ok(None),
        AuthMode::SharedSecret => {
            let secret = config
                .shared_secret
                .clone()
                .ok_or_else(|| anyhow::anyhow!("shared-secret mode requires auth.shared_secret"))?;
            Ok(Some(Arc::new(SharedSecretAuthenticator::new(secret))))
        }
        AuthMode::SignedToken => {
            let issuer = config
                .issuer
                .clone()
                .ok_or_else(|| anyhow::anyhow!("signed-token mode requires auth.issuer"))?;
            let keys_url = config
                .keys_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("signed-token mode requires auth.keys_url"))?;
            let cache = KeyCache::new(keys_url, config.keys_ttl());
            Ok(Some(Arc::new(SignedTokenAuthenticator::new(
                issuer,
                config.audience.clone(),
                cache,
            ))))
        }
        AuthMode::MutualCert => {
            if cfg!(not(feature = "tls")) {
                anyhow::bail!("mutual-cert mode requires the `tls` feature");
            }
            if config.client_ca.is_none() {
                anyhow::bail!("mutual-cert mode requires auth.client_ca");
            }
            Ok(Some(Arc::new(MutualCertAuthenticator)))
        }
    }
}

/// Pulls a bearer token out of the `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
}
