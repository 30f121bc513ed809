//! Mutual-TLS accept loop for the secured listener.
//!
//! Client certificates are optional at the handshake (anonymous callers may
//! still reach open channels), but a presented certificate must chain to one
//! of the configured trust anchors. The accepted peer certificate is carried
//! into the pipeline as a [`ConnectionMeta`] request extension.

use std::sync::Arc;

use anyhow::Context;
use axum::{Router, extract::ConnectInfo};
use hiegate_core::{CoreError, Keystore, PeerCertificate, cert};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use rustls::RootCertStore;
use rustls::server::WebPkiClientVerifier;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::Layer;
use tracing::{debug, info, warn};

use crate::server::{ConnectionMeta, PeerAuth};

/// Build the rustls server configuration from the gateway keystore.
pub fn server_tls_config(keystore: &Keystore) -> hiegate_core::Result<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut keystore.cert_pem.as_bytes())
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| CoreError::certificate(format!("unreadable server certificate: {e}")))?;
    if certs.is_empty() {
        return Err(CoreError::certificate("server certificate PEM holds no certificates"));
    }

    let key = rustls_pemfile::private_key(&mut keystore.key_pem.as_bytes())
        .map_err(|e| CoreError::certificate(format!("unreadable server key: {e}")))?
        .ok_or_else(|| CoreError::certificate("server key PEM holds no private key"))?;

    let mut roots = RootCertStore::empty();
    for anchor in &keystore.ca {
        for der in rustls_pemfile::certs(&mut anchor.pem.as_bytes()) {
            let der = der.map_err(|e| {
                CoreError::certificate(format!("unreadable trust anchor '{}': {e}", anchor.common_name))
            })?;
            roots
                .add(der)
                .map_err(|e| CoreError::certificate(format!("rejected trust anchor: {e}")))?;
        }
    }

    let verifier = if roots.is_empty() {
        WebPkiClientVerifier::no_client_auth()
    } else {
        WebPkiClientVerifier::builder(Arc::new(roots))
            .allow_unauthenticated()
            .build()
            .map_err(|e| CoreError::certificate(format!("client verifier: {e}")))?
    };

    rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| CoreError::certificate(format!("server tls configuration: {e}")))
}

/// Accept TLS connections forever, serving each over hyper on its own task.
pub async fn serve_mtls(
    listener: TcpListener,
    tls_config: Arc<rustls::ServerConfig>,
    router: Router,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(tls_config);
    info!(addr = %listener.local_addr().context("tls listener address")?, "mutual-TLS listener ready");

    loop {
        let (tcp, peer_addr) = listener.accept().await.context("accept tls connection")?;
        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let stream = match acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(peer = %peer_addr, error = %err, "tls handshake failed");
                    return;
                }
            };

            let meta = connection_meta(&stream);
            let service = TowerToHyperService::new(tower::util::MapRequestLayer::new(
                move |mut request: hyper::Request<hyper::body::Incoming>| {
                    request.extensions_mut().insert(meta.clone());
                    request.extensions_mut().insert(ConnectInfo(peer_addr));
                    request
                },
            )
            .layer(router));

            // Dropping the connection drops any in-flight request future,
            // which cancels its outbound route fan-out with it.
            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer_addr, error = %err, "tls connection ended with error");
            }
        });
    }
}

/// Extract what the handshake learned about the peer. An unparseable
/// certificate is remembered as invalid rather than silently anonymous.
fn connection_meta(stream: &tokio_rustls::server::TlsStream<TcpStream>) -> ConnectionMeta {
    let (_, session) = stream.get_ref();
    let peer = match session.peer_certificates().and_then(|chain| chain.first()) {
        None => PeerAuth::Anonymous,
        Some(der) => match cert::parse_der(der.as_ref()) {
            Ok(parsed) => PeerAuth::Certificate(PeerCertificate {
                fingerprint: parsed.fingerprint,
                subject_cn: parsed.subject_cn,
                issuer_cn: parsed.issuer_cn,
            }),
            Err(err) => {
                warn!(error = %err, "peer certificate metadata could not be read");
                PeerAuth::Invalid(err.to_string())
            }
        },
    };

    ConnectionMeta { secured: true, peer }
}
