//! Raw socket route execution: `tcp`, `tls`, and MLLP-framed connections.
//!
//! The request body is written verbatim to the backend. TLS routes use
//! mutual authentication with the keystore's server certificate as the
//! client credential and the trust anchors as backend roots; a rejected
//! handshake is a request failure, not a silent no-op.

use std::sync::Arc;

use hiegate_core::{
    CoreError, Keystore, RequestSnapshot, ResponseSnapshot, Result, Route, RouteProtocol,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::{InboundRequest, now};

/// MLLP start-of-message byte.
const MLLP_START: u8 = 0x0b;
/// MLLP end-of-message delimiter. Bit-exact wire contract: reading stops
/// the moment this byte is seen.
const MLLP_END: u8 = 0x1c;
/// Trailing carriage return closing an MLLP frame.
const MLLP_CR: u8 = 0x0d;

/// Execute one raw-socket route, returning the request snapshot alongside
/// the result.
pub(super) async fn execute(
    route: &Route,
    inbound: &InboundRequest,
    keystore: &Keystore,
    timeout_ms: u64,
) -> (RequestSnapshot, Result<ResponseSnapshot>) {
    let snapshot = RequestSnapshot {
        method: inbound.method.clone(),
        path: inbound.path.clone(),
        query: inbound.query.clone(),
        headers: inbound.headers.clone(),
        body: String::from_utf8(inbound.body.to_vec()).ok(),
        timestamp: now(),
    };

    let result = match timeout(
        Duration::from_millis(timeout_ms),
        send(route, &inbound.body, keystore),
    )
    .await
    {
        Ok(result) => result,
        // The timer aborts the connection by dropping the connect/exchange
        // future; it is never left to hang.
        Err(_) => Err(CoreError::timeout(&route.name, timeout_ms)),
    };

    (snapshot, result)
}

async fn send(route: &Route, body: &[u8], keystore: &Keystore) -> Result<ResponseSnapshot> {
    let address = (route.host.as_str(), route.port);
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| CoreError::transport(&route.name, format!("failed to connect: {e}")))?;

    debug!(route = %route.name, host = %route.host, port = route.port, "socket connected");

    let mllp = route.protocol == RouteProtocol::Mllp;
    let raw = if route.protocol == RouteProtocol::Tls {
        let connector = TlsConnector::from(Arc::new(client_tls_config(route, keystore)?));
        let server_name = rustls::pki_types::ServerName::try_from(route.host.clone())
            .map_err(|e| CoreError::transport(&route.name, format!("invalid host name: {e}")))?;
        let mut tls_stream = connector.connect(server_name, stream).await.map_err(|e| {
            CoreError::transport(&route.name, format!("tls handshake failed: {e}"))
        })?;
        exchange(&mut tls_stream, body, mllp)
            .await
            .map_err(|e| CoreError::transport(&route.name, format!("socket exchange failed: {e}")))?
    } else {
        let mut stream = stream;
        exchange(&mut stream, body, mllp)
            .await
            .map_err(|e| CoreError::transport(&route.name, format!("socket exchange failed: {e}")))?
    };

    let response_body = String::from_utf8_lossy(&raw).into_owned();
    Ok(ResponseSnapshot::new(200, response_body))
}

/// Mutual-auth TLS client configuration: backend roots come from the
/// keystore trust anchors (narrowed to the route's pinned anchor when one
/// is referenced), the client credential is the gateway's own certificate.
fn client_tls_config(route: &Route, keystore: &Keystore) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    let anchors = keystore
        .ca
        .iter()
        .filter(|a| route.cert.as_deref().is_none_or(|fp| a.fingerprint == fp));
    for anchor in anchors {
        for der in rustls_pemfile::certs(&mut anchor.pem.as_bytes()) {
            let der = der.map_err(|e| {
                CoreError::certificate(format!("unreadable trust anchor: {e}"))
            })?;
            roots
                .add(der)
                .map_err(|e| CoreError::certificate(format!("rejected trust anchor: {e}")))?;
        }
    }

    let certs = rustls_pemfile::certs(&mut keystore.cert_pem.as_bytes())
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| CoreError::certificate(format!("unreadable server certificate: {e}")))?;
    let key = rustls_pemfile::private_key(&mut keystore.key_pem.as_bytes())
        .map_err(|e| CoreError::certificate(format!("unreadable server key: {e}")))?
        .ok_or_else(|| CoreError::certificate("keystore has no private key".to_string()))?;

    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| CoreError::certificate(format!("invalid client credential: {e}")))
}

/// Write the raw body and collect the backend's reply.
///
/// MLLP wraps the body in its framing bytes and reads until the
/// end-of-message delimiter; other transports close the write half and
/// read to EOF.
async fn exchange<S>(stream: &mut S, body: &[u8], mllp: bool) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if mllp {
        stream.write_all(&[MLLP_START]).await?;
        stream.write_all(body).await?;
        stream.write_all(&[MLLP_END, MLLP_CR]).await?;
        stream.flush().await?;
        read_mllp_frame(stream).await
    } else {
        stream.write_all(body).await?;
        stream.shutdown().await?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await?;
        Ok(out)
    }
}

/// Read until the MLLP end-of-message byte, stripping the framing.
async fn read_mllp_frame<S>(stream: &mut S) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Some(end) = buf[..n].iter().position(|&b| b == MLLP_END) {
            collected.extend_from_slice(&buf[..end]);
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    if collected.first() == Some(&MLLP_START) {
        collected.remove(0);
    }
    Ok(collected)
}
