//! Control-plane daemon for terminal-multiplexer orchestration.
//!
//! muxd exposes a uniform REST surface, a Server-Sent-Events stream and a
//! topic-based WebSocket feed over a hand-rolled hyper stack. The request
//! pipeline tags every request with a correlation id, isolates panics,
//! enforces an origin allowlist, authenticates (shared-secret, RS256 signed
//! tokens with a remote key cache, or mutual TLS), authorizes per-route
//! permissions, and replays idempotent mutations. Domain behavior — the
//! actual multiplexer driving — stays behind an opaque command registry.
//!
//! # Key pieces
//! - [router::Router] routes requests through the middleware pipeline.
//! - [hub::Hub] fans bus events to WebSocket subscribers with monotonic
//!   sequence numbers and drop-on-backpressure queues.
//! - [sse] streams the same events to EventSource clients.
//! - [jobs::JobRegistry] runs asynchronous operations with a strict state
//!   machine and cancellation.
//! - [app::App] assembles the injected singletons; [server::serve] runs the
//!   listener with graceful drain.

/// Application assembly and route table.
pub mod app;

/// Mode-dispatched authentication, key cache, roles and permissions.
pub mod auth;

/// Unified request/response body type.
pub mod body;

/// Bus-to-subscriber event bridge.
pub mod bridge;

/// In-process event bus.
pub mod bus;

/// Opaque domain command registry.
pub mod commands;

/// Configuration loading and validation.
pub mod config;

/// Uniform JSON response envelope and error codes.
pub mod envelope;

/// Request handler traits and boxing.
mod handler;

/// HTTP route handlers.
pub mod handlers;

/// Subscription hub and topic matching.
pub mod hub;

/// Idempotent-replay cache.
pub mod idempotency;

/// Asynchronous job registry and executor.
pub mod jobs;

/// Structured logging setup.
pub mod logging;

/// Request pipeline middleware.
pub mod middleware;

/// Origin allowlist parsing and matching.
pub mod origin;

/// Path parameters.
pub mod params;

/// Response conversion trait.
pub mod responder;

/// Route definition and matching.
mod route;

/// Request routing and dispatch.
pub mod router;

/// HTTP server loop.
pub mod server;

/// TLS listener with client-certificate verification.
#[cfg(feature = "tls")]
pub mod server_tls;

/// Server-Sent-Events channel.
pub mod sse;

/// Pane output stream collectors.
pub mod streams;

/// Core type aliases.
pub mod types;

/// WebSocket endpoint and client protocol.
pub mod ws;

pub use http::{Method, StatusCode, header};

pub use route::Route;
