#![cfg(feature = "tls")]

//! TLS listener with optional client-certificate verification.
//!
//! Required for `mutual-cert` auth: the handshake verifies the client chain
//! against the configured trust anchor, and the peer certificate's
//! fingerprint is attached to every request on the connection so the
//! authenticator can turn it into claims.

use std::{convert::Infallible, fs::File, io::BufReader, path::Path, sync::Arc, time::Duration};

use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use rustls::{
    RootCertStore, ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
};
use rustls_pemfile::{certs, pkcs8_private_keys};
use sha1::{Digest, Sha1};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{app::App, auth::PeerIdentity, body::MuxBody, config::AuthMode};

const DRAIN_GRACE: Duration = Duration::from_secs(5);
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs: Result<Vec<_>, _> = certs(&mut reader).collect();
    Ok(certs?)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    let key = pkcs8_private_keys(&mut reader)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no private key in {}", path.display()))??;
    Ok(key.into())
}

fn tls_config(app: &App) -> anyhow::Result<ServerConfig> {
    let auth = &app.config.auth;
    let cert_path = auth
        .tls_cert
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("tls requires auth.tls_cert"))?;
    let key_path = auth
        .tls_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("tls requires auth.tls_key"))?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = ServerConfig::builder();
    let mut config = if auth.mode == AuthMode::MutualCert {
        let ca_path = auth
            .client_ca
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("mutual-cert requires auth.client_ca"))?;
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots.add(cert)?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| anyhow::anyhow!("client verifier: {e}"))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

fn peer_fingerprint(cert: &CertificateDer<'_>) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(cert.as_ref());
    format!("sha1:{}", hex::encode(sha1.finalize()))
}

/// Serves the app over TLS until `shutdown` fires, then drains.
pub async fn serve_tls(
    listener: TcpListener,
    app: Arc<App>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(Arc::new(tls_config(&app)?));
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

        let acceptor = acceptor.clone();
        let router = router.clone();
        let conn_shutdown = shutdown.clone();

        tracker.spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::debug!(%err, "tls handshake failed");
                    return;
                }
            };

            let peer = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|chain| chain.first())
                .map(|cert| PeerIdentity {
                    fingerprint: peer_fingerprint(cert),
                });

            let io = TokioIo::new(tls_stream);
            let svc = service_fn(move |req: hyper::Request<Incoming>| {
                let router = router.clone();
                let peer = peer.clone();
                async move {
                    let mut req = req.map(MuxBody::new);
                    req.extensions_mut().insert(addr);
                    if let Some(peer) = peer {
                        req.extensions_mut().insert(peer);
                    }
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
