//! Signed-token (RS256) authentication.
//!
//! Tokens arrive as `Authorization: Bearer <token>` in the standard
//! three-segment form. Verification pins the algorithm to RS256, resolves the
//! signing key through the remote key cache by `kid` (or the implicit single
//! key), and checks issuer, audience, expiry and not-before with a 30 s
//! tolerance. Every distinct failure is logged by the middleware but folds to
//! `UNAUTHORIZED` on the wire.

use std::collections::HashSet;

use async_trait::async_trait;
use http::{Extensions, HeaderMap};
use jwt_simple::prelude::{
    Audiences, Duration as TokenDuration, JWTClaims, RSAPublicKeyLike, Token, VerificationOptions,
};
use serde_json::{Map, Value};

use super::{AuthError, Authenticator, Claims, KeyCache, bearer_token};

const CLOCK_TOLERANCE_SECS: u64 = 30;

pub struct SignedTokenAuthenticator {
    issuer: String,
    audience: Option<String>,
    keys: KeyCache,
}

impl SignedTokenAuthenticator {
    pub fn new(issuer: String, audience: Option<String>, keys: KeyCache) -> Self {
        Self {
            issuer,
            audience,
            keys,
        }
    }

    fn verification_options(&self) -> VerificationOptions {
        let mut issuers = HashSet::new();
        issuers.insert(self.issuer.clone());

        let allowed_audiences = self.audience.as_ref().map(|aud| {
            let mut set = HashSet::new();
            set.insert(aud.clone());
            set
        });

        let mut options = VerificationOptions::default();
        options.allowed_issuers = Some(issuers);
        options.allowed_audiences = allowed_audiences;
        options.time_tolerance = Some(TokenDuration::from_secs(CLOCK_TOLERANCE_SECS));
        options
    }

    pub(crate) async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let metadata =
            Token::decode_metadata(token).map_err(|e| AuthError::Token(e.to_string()))?;

        let algorithm = metadata.algorithm();
        if algorithm != "RS256" {
            return Err(AuthError::Token(format!(
                "algorithm {algorithm} not allowed"
            )));
        }

        let key = self.keys.get(metadata.key_id()).await?;
        let verified: JWTClaims<Map<String, Value>> = key
            .verify_token(token, Some(self.verification_options()))
            .map_err(|e| AuthError::Token(e.to_string()))?;

        Ok(flatten_claims(verified))
    }
}

/// Folds the registered claims back into the open map so the authorizer and
/// the subscription ACL hook see one uniform view.
fn flatten_claims(verified: JWTClaims<Map<String, Value>>) -> Claims {
    let mut map = verified.custom;
    if let Some(issuer) = verified.issuer {
        map.insert("iss".to_string(), Value::String(issuer));
    }
    if let Some(subject) = verified.subject {
        map.insert("sub".to_string(), Value::String(subject));
    }
    if let Some(audiences) = verified.audiences {
        let value = match audiences {
            Audiences::AsString(aud) => Value::String(aud),
            Audiences::AsSet(set) => {
                let mut list: Vec<_> = set.into_iter().collect();
                list.sort();
                match list.len() {
                    1 => Value::String(list.remove(0)),
                    _ => Value::Array(list.into_iter().map(Value::String).collect()),
                }
            }
        };
        map.insert("aud".to_string(), value);
    }
    Claims(map)
}

#[async_trait]
impl Authenticator for SignedTokenAuthenticator {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        _extensions: &Extensions,
    ) -> Result<Claims, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
        self.verify(token).await
    }
}
