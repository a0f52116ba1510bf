//! Application assembly.
//!
//! All process-wide services (origin policy, authenticator, replay cache,
//! job registry, hub, SSE broadcaster, bus, command registry) are built here
//! and injected into handlers by closure capture, so tests can assemble an
//! app around fakes and the sweeper/hub lifecycles stay explicit.

use std::{path::PathBuf, sync::Arc};

use http::Method;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::{
    auth::{self, Authenticator, roles::Permission},
    bridge,
    bus::Bus,
    commands::{CommandRegistry, builtin_registry},
    config::{AuthMode, Config},
    handlers::{jobs as jobs_api, sessions as sessions_api, system},
    hub::{AllowAll, Hub},
    idempotency::IdempotencyCache,
    jobs::JobRegistry,
    middleware::{
        IntoMiddleware, access_log, auth::AuthLayer, authorize, cors::CorsLayer,
        idempotency::IdempotencyLayer, recover, request_id,
    },
    origin::OriginPolicyHandle,
    router::Router,
    route::Route,
    sse::SseBroadcaster,
    streams::PaneStreams,
    types::Request,
    ws,
};

pub struct App {
    pub config: Config,
    pub origins: OriginPolicyHandle,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub idempotency: Arc<IdempotencyCache>,
    pub jobs: Arc<JobRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub bus: Bus,
    pub hub: Hub,
    pub sse: Arc<SseBroadcaster>,
    pub streams: Arc<PaneStreams>,
    pub project_dir: RwLock<PathBuf>,
    pub started_at: Instant,
}

impl App {
    /// Builds every subsystem from configuration and attaches the event
    /// bridge. Must run inside a tokio runtime (the hub loop and the replay
    /// sweeper spawn here).
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        Self::with_commands(config, builtin_registry())
    }

    /// Same as [`App::new`] with a caller-provided command registry, the
    /// seam where the real multiplexer driver plugs in.
    pub fn with_commands(
        config: Config,
        commands: Arc<CommandRegistry>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;

        let origins = OriginPolicyHandle::new(config.origin_policy());
        let authenticator = auth::build(&config.auth)?;
        let idempotency = IdempotencyCache::new(config.idempotency_ttl());
        let jobs = Arc::new(JobRegistry::new());
        let bus = Bus::new();
        let hub = Hub::spawn(Arc::new(AllowAll));
        let sse = SseBroadcaster::new();
        let streams = PaneStreams::new(hub.clone(), bus.clone(), commands.clone());

        bridge::attach(&bus, hub.clone(), sse.clone());

        let project_dir = RwLock::new(config.project_dir.clone());
        Ok(Arc::new(Self {
            config,
            origins,
            authenticator,
            idempotency,
            jobs,
            commands,
            bus,
            hub,
            sse,
            streams,
            project_dir,
            started_at: Instant::now(),
        }))
    }

    pub fn local_mode(&self) -> bool {
        self.config.auth.mode == AuthMode::Local
    }

    /// Builds the full route table with the pipeline attached.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();

        router.middleware(request_id::apply);
        router.middleware(recover::apply);
        router.middleware(access_log::apply);
        router.middleware(CorsLayer::new(self.origins.clone()).into_middleware());
        router.middleware(AuthLayer::new(self.authenticator.clone()).into_middleware());
        router.middleware(authorize::apply);

        let replay = IdempotencyLayer::new(self.idempotency.clone());

        // Open liveness probe.
        router.route(Method::GET, "/health", system::health);

        // SSE stream.
        {
            let app = self.clone();
            router.route_protected(
                Method::GET,
                "/events",
                Permission::ReadEvents,
                move |req: Request| {
                    let sse = app.sse.clone();
                    async move { crate::sse::handler(req, sse).await }
                },
            );
        }

        // System information.
        self.get(&mut router, "/api/v1/health", Permission::ReadHealth, system::api_health);
        self.get(&mut router, "/api/v1/version", Permission::ReadHealth, system::version);
        self.get(
            &mut router,
            "/api/v1/capabilities",
            Permission::ReadHealth,
            system::capabilities,
        );
        self.get(&mut router, "/api/v1/deps", Permission::ReadHealth, system::deps);
        self.get(&mut router, "/api/v1/doctor", Permission::ReadHealth, system::doctor);
        self.get(&mut router, "/api/v1/config", Permission::ReadHealth, system::config_get);
        self.route(
            &mut router,
            Method::PATCH,
            "/api/v1/config",
            Permission::SystemConfig,
            system::config_patch,
        );

        // Sessions and panes.
        self.get(&mut router, "/api/v1/sessions", Permission::ReadSessions, sessions_api::list);
        self.route(
            &mut router,
            Method::POST,
            "/api/v1/sessions",
            Permission::WriteSessions,
            sessions_api::create,
        )
        .middleware(replay.clone().into_middleware());
        self.get(
            &mut router,
            "/api/v1/sessions/{id}",
            Permission::ReadSessions,
            sessions_api::get,
        );
        self.route(
            &mut router,
            Method::DELETE,
            "/api/v1/sessions/{id}",
            Permission::WriteSessions,
            sessions_api::delete,
        )
        .middleware(replay.clone().into_middleware());
        self.get(
            &mut router,
            "/api/v1/sessions/{id}/panes",
            Permission::ReadSessions,
            sessions_api::panes,
        );
        self.route(
            &mut router,
            Method::POST,
            "/api/v1/sessions/{id}/panes/{index}/stream",
            Permission::WriteSessions,
            sessions_api::stream_start,
        );
        self.route(
            &mut router,
            Method::DELETE,
            "/api/v1/sessions/{id}/panes/{index}/stream",
            Permission::WriteSessions,
            sessions_api::stream_stop,
        );

        // Agents (read surface).
        self.get(
            &mut router,
            "/api/v1/agents",
            Permission::ReadAgents,
            |req: Request, app: Arc<App>| async move {
                let result = app
                    .commands
                    .invoke("agents.list", serde_json::Value::Null)
                    .await;
                crate::handlers::command_response(&req, result)
            },
        );

        // Jobs.
        self.route(
            &mut router,
            Method::POST,
            "/api/v1/jobs",
            Permission::WriteJobs,
            jobs_api::create,
        )
        .middleware(replay.clone().into_middleware());
        self.get(&mut router, "/api/v1/jobs", Permission::ReadJobs, jobs_api::list);
        self.get(&mut router, "/api/v1/jobs/{id}", Permission::ReadJobs, jobs_api::get);
        self.route(
            &mut router,
            Method::DELETE,
            "/api/v1/jobs/{id}",
            Permission::WriteJobs,
            jobs_api::cancel,
        )
        .middleware(replay.into_middleware());

        // WebSocket upgrade.
        {
            let app = self.clone();
            router.route_protected(
                Method::GET,
                "/api/v1/ws",
                Permission::ReadWebsocket,
                move |req: Request| {
                    let hub = app.hub.clone();
                    let origins = app.origins.clone();
                    let local = app.local_mode();
                    async move { ws::handler(req, hub, origins, local).await }
                },
            );
        }

        router
    }

    fn get<F>(
        self: &Arc<Self>,
        router: &mut Router,
        path: &str,
        permission: Permission,
        handler: F,
    ) -> Arc<Route>
    where
        F: crate::handlers::AppHandler,
    {
        self.route(router, Method::GET, path, permission, handler)
    }

    fn route<F>(
        self: &Arc<Self>,
        router: &mut Router,
        method: Method,
        path: &str,
        permission: Permission,
        handler: F,
    ) -> Arc<Route>
    where
        F: crate::handlers::AppHandler,
    {
        let app = self.clone();
        router.route_protected(method, path, permission, move |req: Request| {
            let app = app.clone();
            let handler = handler.clone();
            async move { handler.call(req, app).await }
        })
    }

    /// Stops background work: hub loop, SSE queues, pane collectors, replay
    /// sweeper. WebSocket writers and SSE bodies end as their queues close.
    pub fn shutdown(&self) {
        self.hub.shutdown();
        self.sse.shutdown();
        self.streams.stop_all();
        self.idempotency.stop();
    }
}
