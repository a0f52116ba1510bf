//! Middleware chain for the request pipeline.
//!
//! The pipeline is an ordered list of boxed middleware functions executed
//! through [`Next`]: request-id assignment, panic recovery, access logging,
//! CORS, authentication, authorization, and (on mutating routes) idempotent
//! replay. Each stage either produces a response directly or calls
//! `next.run(req)` to continue the chain toward the route handler.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    handler::BoxHandler,
    types::{BoxMiddleware, Request, Response},
};

pub mod access_log;
pub mod auth;
pub mod authorize;
pub mod cors;
pub mod idempotency;
pub mod recover;
pub mod request_id;

/// Trait for converting configured components into middleware functions.
pub trait IntoMiddleware {
    fn into_middleware(
        self,
    ) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>
    + Clone
    + Send
    + Sync
    + 'static;
}

/// The remainder of the middleware chain plus the final endpoint.
pub struct Next {
    /// Remaining middlewares to be executed in the chain.
    pub middlewares: Arc<Vec<BoxMiddleware>>,
    /// Final endpoint handler called once the chain is exhausted.
    pub endpoint: Arc<BoxHandler>,
}

impl Next {
    /// Executes the next middleware, or the endpoint if none remain.
    pub async fn run(self, req: Request) -> Response {
        if let Some((mw, rest)) = self.middlewares.split_first() {
            let rest = Arc::new(rest.to_vec());
            mw(
                req,
                Next {
                    middlewares: rest,
                    endpoint: self.endpoint.clone(),
                },
            )
            .await
        } else {
            self.endpoint.call(req).await
        }
    }
}
