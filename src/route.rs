//! Route definition and path matching.
//!
//! Routes pair an HTTP method and a path pattern with a handler, an optional
//! required permission (checked by the authorization middleware), and a
//! route-local middleware chain (used to attach idempotent replay to mutating
//! routes only).

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use http::Method;

use crate::{
    auth::roles::Permission,
    handler::BoxHandler,
    middleware::Next,
    responder::Responder,
    types::{BoxMiddleware, Request},
};

/// A registered route.
pub struct Route {
    /// Original path pattern, e.g. `/api/v1/sessions/{id}`.
    pub path: String,
    /// HTTP method this route responds to.
    pub method: Method,
    /// Handler invoked when the route matches.
    pub handler: BoxHandler,
    /// Permission required to invoke the handler; `None` for open routes.
    pub permission: Option<Permission>,
    /// Route-local middleware, appended after the global chain.
    pub middlewares: RwLock<VecDeque<BoxMiddleware>>,
}

impl Route {
    pub fn new(
        path: String,
        method: Method,
        handler: BoxHandler,
        permission: Option<Permission>,
    ) -> Self {
        Self {
            path,
            method,
            handler,
            permission,
            middlewares: RwLock::new(VecDeque::new()),
        }
    }

    /// Appends middleware to this route's chain.
    pub fn middleware<F, Fut, R>(&self, f: F) -> &Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Responder + Send + 'static,
    {
        let mw: BoxMiddleware = Arc::new(move |req, next| {
            let fut = f(req, next);
            Box::pin(async move { fut.await.into_response() })
        });

        self.middlewares.write().unwrap().push_back(mw);
        self
    }

    /// Matches a concrete request path against this route's pattern.
    ///
    /// `{name}` segments capture one path segment each; all other segments
    /// must match literally. Returns the captured parameters on success.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern = self.path.trim_matches('/');
        let concrete = path.trim_matches('/');

        let mut params = HashMap::new();

        let mut pat_segs = pattern.split('/');
        let mut req_segs = concrete.split('/');

        loop {
            match (pat_segs.next(), req_segs.next()) {
                (Some(pat), Some(seg)) => {
                    if let Some(name) = pat.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                        if seg.is_empty() {
                            return None;
                        }
                        params.insert(name.to_string(), seg.to_string());
                    } else if pat != seg {
                        return None;
                    }
                }
                (None, None) => return Some(params),
                _ => return None,
            }
        }
    }
}
