//! Remote signing-key cache for signed-token mode.
//!
//! Keys are fetched from a JWKS-style endpoint and cached wholesale with a
//! single fetch timestamp. Within the TTL the cache serves lookups directly;
//! on a miss or after expiry one task refreshes while others wait, and the
//! fetched set replaces the cache in one step. The fetch itself runs outside
//! the cache lock, is bounded to 1 MiB of response body and 5 s total, and a
//! key that is still missing after a refresh is a verification failure.

use std::{collections::HashMap, sync::Arc, time::Duration};

use jwt_simple::prelude::RS256PublicKey;
use serde::Deserialize;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};

use super::AuthError;

const MAX_FETCH_BYTES: usize = 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Raw JWK entry; only RSA components are consumed.
#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// One parsed key set.
#[derive(Default)]
pub(crate) struct KeySet {
    by_kid: HashMap<String, Arc<RS256PublicKey>>,
    /// Set when the fetched set contains exactly one key, with or without a
    /// key id; serves tokens that carry no `kid`.
    single: Option<Arc<RS256PublicKey>>,
}

impl KeySet {
    fn lookup(&self, kid: Option<&str>) -> Option<Arc<RS256PublicKey>> {
        match kid {
            Some(kid) => self.by_kid.get(kid).cloned(),
            None => self.single.clone(),
        }
    }
}

struct CacheState {
    keys: KeySet,
    fetched_at: Option<Instant>,
}

/// TTL-bounded cache of remote verification keys.
pub struct KeyCache {
    inner: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
    url: String,
    ttl: Duration,
    client: reqwest::Client,
}

impl KeyCache {
    pub fn new(url: String, ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            inner: RwLock::new(CacheState {
                keys: KeySet::default(),
                fetched_at: None,
            }),
            refresh_lock: Mutex::new(()),
            url,
            ttl,
            client,
        }
    }

    /// Cache seeded with fixed keys and no remote endpoint. Lookups never
    /// refresh; used by tests and by deployments that pin keys on disk.
    pub fn preloaded(keys: Vec<(Option<String>, RS256PublicKey)>) -> Self {
        let cache = Self::new(String::new(), Duration::from_secs(u64::MAX / 4));
        let set = build_key_set(keys);
        {
            let mut state = cache.inner.try_write().expect("fresh cache");
            state.keys = set;
            state.fetched_at = Some(Instant::now());
        }
        cache
    }

    /// Resolves the verification key for `kid` (or the implicit single key
    /// when the token carries none), refreshing from the remote endpoint on
    /// miss or expiry.
    pub async fn get(&self, kid: Option<&str>) -> Result<Arc<RS256PublicKey>, AuthError> {
        {
            let state = self.inner.read().await;
            if let Some(fetched_at) = state.fetched_at {
                if fetched_at.elapsed() < self.ttl {
                    if let Some(key) = state.keys.lookup(kid) {
                        return Ok(key);
                    }
                }
            }
        }

        self.refresh().await?;

        let state = self.inner.read().await;
        state.keys.lookup(kid).ok_or_else(|| {
            AuthError::KeyUnavailable(match kid {
                Some(kid) => format!("no key with id {kid:?} after refresh"),
                None => "key set is empty or ambiguous and token has no key id".to_string(),
            })
        })
    }

    /// Single-flight refresh: the fetch happens outside the cache lock, and
    /// the parsed set replaces the cache wholesale.
    async fn refresh(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        // Another waiter may have refreshed while we queued.
        {
            let state = self.inner.read().await;
            if let Some(fetched_at) = state.fetched_at {
                if fetched_at.elapsed() < Duration::from_secs(1) {
                    return Ok(());
                }
            }
        }

        if self.url.is_empty() {
            return Err(AuthError::KeyFetch("no key endpoint configured".into()));
        }

        let body = self.fetch_capped().await?;
        let keys = parse_jwks(&body)?;
        let count = keys.by_kid.len().max(usize::from(keys.single.is_some()));
        tracing::debug!(count, "replaced signing key cache");

        let mut state = self.inner.write().await;
        state.keys = keys;
        state.fetched_at = Some(Instant::now());
        Ok(())
    }

    async fn fetch_capped(&self) -> Result<Vec<u8>, AuthError> {
        let mut response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
        {
            let remaining = MAX_FETCH_BYTES - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

fn build_key_set(keys: Vec<(Option<String>, RS256PublicKey)>) -> KeySet {
    let mut set = KeySet::default();
    let total = keys.len();
    for (kid, key) in keys {
        let key = Arc::new(key);
        if total == 1 {
            set.single = Some(key.clone());
        }
        if let Some(kid) = kid {
            set.by_kid.insert(kid, key);
        }
    }
    set
}

/// Parses a JWKS document into usable RSA verification keys. Non-RSA entries
/// and entries with malformed components are skipped.
fn parse_jwks(body: &[u8]) -> Result<KeySet, AuthError> {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    let doc: JwksResponse =
        serde_json::from_slice(body).map_err(|e| AuthError::KeyFetch(format!("bad JWKS: {e}")))?;

    let mut parsed = Vec::new();
    for jwk in doc.keys {
        if jwk.kty != "RSA" {
            continue;
        }
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            tracing::warn!(kid = ?jwk.kid, "RSA key missing n/e components");
            continue;
        };
        let (Ok(n), Ok(e)) = (URL_SAFE_NO_PAD.decode(n), URL_SAFE_NO_PAD.decode(e)) else {
            tracing::warn!(kid = ?jwk.kid, "RSA key components are not base64url");
            continue;
        };
        match RS256PublicKey::from_components(&n, &e) {
            Ok(key) => parsed.push((jwk.kid, key)),
            Err(err) => tracing::warn!(kid = ?jwk.kid, %err, "unusable RSA key"),
        }
    }

    Ok(build_key_set(parsed))
}
