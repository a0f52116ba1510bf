//! HTTP server loop and lifecycle.
//!
//! Each accepted connection runs in its own task; requests are mapped into
//! the uniform body type and dispatched through the router. Shutdown is
//! cooperative: the signal stops the accept loop, background subsystems are
//! told to stop (hub, SSE, collectors, sweeper), open connections get a
//! graceful close, and the whole drain is bounded by a 5 s grace period.
//!
//! There is deliberately no write deadline on responses — long-lived SSE
//! streams must never be truncated by the server. The header read timeout
//! still bounds slow request starts.

use std::{convert::Infallible, sync::Arc, time::Duration};

use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{app::App, body::MuxBody};

const DRAIN_GRACE: Duration = Duration::from_secs(5);
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves the app until `shutdown` fires, then drains.
pub async fn serve(
    listener: TcpListener,
    app: Arc<App>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let router = Arc::new(app.router());
    let tracker = TaskTracker::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%err, "accept failed");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let router = router.clone();
        let conn_shutdown = shutdown.clone();

        tracker.spawn(async move {
            let svc = service_fn(move |req: hyper::Request<Incoming>| {
                let router = router.clone();
                async move {
                    let mut req = req.map(MuxBody::new);
                    req.extensions_mut().insert(addr);
                    Ok::<_, Infallible>(router.dispatch(req).await)
                }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true)
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT);

            let conn = http.serve_connection(io, svc).with_upgrades();
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(err) = result {
                        tracing::debug!(%err, "connection error");
                    }
                }
                _ = conn_shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.as_mut().await;
                }
            }
        });
    }

    tracing::info!("shutting down");
    app.shutdown();
    tracker.close();
    if tokio::time::timeout(DRAIN_GRACE, tracker.wait()).await.is_err() {
        tracing::warn!("drain grace period expired with connections still open");
    }
    Ok(())
}
