use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use muxd::{app::App, config::Config};

#[derive(Parser)]
#[command(name = "muxd", version, about = "Terminal-multiplexer orchestration daemon")]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    muxd::logging::init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    config.validate()?;

    let app = App::new(config)?;
    let listener = TcpListener::bind(app.config.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        auth_mode = app.config.auth.mode.as_str(),
        "muxd listening"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    if app.config.auth.mode == muxd::config::AuthMode::MutualCert {
        #[cfg(feature = "tls")]
        return muxd::server_tls::serve_tls(listener, app, shutdown).await;
        #[cfg(not(feature = "tls"))]
        anyhow::bail!("mutual-cert mode requires the `tls` feature");
    }

    muxd::server::serve(listener, app, shutdown).await
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut term =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}
