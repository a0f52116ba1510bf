//! Request routing and dispatch.
//!
//! The router owns the route table and the global middleware chain. Dispatch
//! matches method + path, stamps path parameters and the route's required
//! permission into request extensions, then runs the global and route-local
//! middleware chains through [`Next`]. Unmatched requests still flow through
//! the global chain toward a 404/405 endpoint so that every response carries
//! a request id, CORS headers and an access-log line.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use http::Method;

use crate::{
    auth::roles::{Permission, RequiredPermission},
    envelope::{self, ErrorCode},
    handler::{BoxHandler, Handler},
    middleware::Next,
    params::PathParams,
    responder::Responder,
    route::Route,
    types::{BoxMiddleware, Request, Response},
};

/// HTTP router: route table plus global middleware.
pub struct Router {
    routes: DashMap<(Method, String), Arc<Route>>,
    middlewares: RwLock<Vec<BoxMiddleware>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: DashMap::default(),
            middlewares: RwLock::new(Vec::new()),
        }
    }

    /// Registers an open route (no permission requirement).
    pub fn route<H>(&mut self, method: Method, path: &str, handler: H) -> Arc<Route>
    where
        H: Handler,
    {
        self.insert(method, path, BoxHandler::new(handler), None)
    }

    /// Registers a route that requires `permission`.
    ///
    /// The authorization middleware reads the requirement from request
    /// extensions; a route registered this way is never reachable without a
    /// role granting the permission (except in `local` mode, where the
    /// anonymous role still has to satisfy it).
    pub fn route_protected<H>(
        &mut self,
        method: Method,
        path: &str,
        permission: Permission,
        handler: H,
    ) -> Arc<Route>
    where
        H: Handler,
    {
        self.insert(method, path, BoxHandler::new(handler), Some(permission))
    }

    fn insert(
        &mut self,
        method: Method,
        path: &str,
        handler: BoxHandler,
        permission: Option<Permission>,
    ) -> Arc<Route> {
        let route = Arc::new(Route::new(
            path.to_string(),
            method.clone(),
            handler,
            permission,
        ));
        self.routes
            .insert((method, path.to_owned()), route.clone());
        route
    }

    /// Adds global middleware, executed for all routes in registration order.
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

        self.middlewares.write().unwrap().push(mw);
        self
    }

    /// Dispatches a request to the matching route handler.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        for route in self.routes.iter() {
            if route.method != method {
                continue;
            }

            if let Some(params) = route.match_path(&path) {
                if !params.is_empty() {
                    req.extensions_mut().insert(PathParams(params));
                }
                if let Some(permission) = route.permission {
                    req.extensions_mut().insert(RequiredPermission(permission));
                }

                let g_mws = self.middlewares.read().unwrap().clone();
                let r_mws = route.middlewares.read().unwrap().clone();
                let mut chain = Vec::with_capacity(g_mws.len() + r_mws.len());
                chain.extend(g_mws);
                chain.extend(r_mws);

                let next = Next {
                    middlewares: Arc::new(chain),
                    endpoint: Arc::new(route.handler.clone()),
                };
                return next.run(req).await;
            }
        }

        // No route matched. Distinguish 405 from 404, then run the global
        // chain with the error endpoint so the envelope and headers are
        // produced the same way as for matched routes.
        let path_known = self
            .routes
            .iter()
            .any(|route| route.match_path(&path).is_some());

        let endpoint = if path_known && method != Method::OPTIONS {
            BoxHandler::new(|req: Request| async move {
                envelope::failure(
                    &req,
                    ErrorCode::MethodNotAllowed,
                    "method not allowed for this resource",
                )
            })
        } else {
            BoxHandler::new(|req: Request| async move {
                envelope::failure(&req, ErrorCode::NotFound, "resource not found")
            })
        };

        let next = Next {
            middlewares: Arc::new(self.middlewares.read().unwrap().clone()),
            endpoint: Arc::new(endpoint),
        };
        next.run(req).await
    }
}
