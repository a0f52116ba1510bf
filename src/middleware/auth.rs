//! Authentication stage.
//!
//! Bypassed in `local` mode (no authenticator configured) and for `OPTIONS`.
//! On success the decoded claims land in request extensions for the
//! authorizer and the subscription ACL hook; on failure the caller gets a
//! bare 401 while the concrete reason goes to the log.

use std::{future::Future, pin::Pin, sync::Arc};

use http::Method;

use crate::{
    auth::Authenticator,
    envelope::{self, ErrorCode},
    middleware::{IntoMiddleware, Next},
    types::{Request, Response},
};

#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl AuthLayer {
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self { authenticator }
    }
}

impl IntoMiddleware for AuthLayer {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static {
        move |mut req: Request, next: Next| {
            let authenticator = self.authenticator.clone();

            Box::pin(async move {
                let Some(authenticator) = authenticator else {
                    return next.run(req).await;
                };
                if req.method() == Method::OPTIONS {
                    return next.run(req).await;
                }

                let outcome = {
                    let (headers, extensions) = (req.headers(), req.extensions());
                    authenticator.authenticate(headers, extensions).await
                };

                match outcome {
                    Ok(claims) => {
                        req.extensions_mut().insert(claims);
                        next.run(req).await
                    }
                    Err(err) => {
                        tracing::debug!(%err, path = req.uri().path(), "authentication failed");
                        envelope::failure(&req, ErrorCode::Unauthorized, "authentication required")
                    }
                }
            })
        }
    }
}
