use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use hiegate_core::{Channel, ClientRecord, Keystore, TrustedCert, cert};
use hiegate_server::config::{AppConfig, TlsConfig, load_config};
use hiegate_server::{
    AllowListAuthorizer, AppState, LoggingRecorder, MemoryChannelStore, SwappableKeystore,
    build_router, observability, tls,
};
use tokio::net::TcpListener;
use tracing::info;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From HIEGATE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (hiegate.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (HIEGATE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present; it is optional.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    // Initialize tracing early with the default level
    observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(2);
    }

    observability::apply_logging_level(&cfg.logging.level);
    info!(
        path = %config_path.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_else(|| "<defaults>".into()),
        source = %source,
        "Configuration loaded"
    );

    if let Err(e) = run(cfg).await {
        eprintln!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let channels: Vec<Channel> = load_seed(cfg.store.channels_file.as_deref(), "channels")?;
    let clients: Vec<ClientRecord> = load_seed(cfg.store.clients_file.as_deref(), "clients")?;
    info!(
        channels = channels.len(),
        clients = clients.len(),
        "Stores seeded"
    );

    let keystore = build_keystore(&cfg.tls)?;

    let state = AppState::new(
        &cfg,
        Arc::new(MemoryChannelStore::new(channels, clients)),
        Arc::new(SwappableKeystore::new(keystore.clone())),
        Arc::new(AllowListAuthorizer),
        Arc::new(LoggingRecorder),
    );
    let router = build_router(state);

    if cfg.tls.enabled {
        let tls_config = Arc::new(tls::server_tls_config(&keystore)?);
        let https_addr = format!("{}:{}", cfg.server.host, cfg.server.https_port);
        let listener = TcpListener::bind(&https_addr)
            .await
            .with_context(|| format!("bind {https_addr}"))?;
        let secured_router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = tls::serve_mtls(listener, tls_config, secured_router).await {
                tracing::error!(error = %e, "TLS listener failed");
            }
        });
    }

    let http_addr = format!("{}:{}", cfg.server.host, cfg.server.http_port);
    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("bind {http_addr}"))?;
    info!(addr = %http_addr, "HTTP listener ready");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server")?;

    Ok(())
}

/// Read the gateway certificate, key, and trust anchors into a keystore
/// snapshot. With TLS disabled this is empty; the resolver then sees no
/// anchors and falls back to fingerprint-only matching.
fn build_keystore(tls: &TlsConfig) -> anyhow::Result<Keystore> {
    if !tls.enabled {
        return Ok(Keystore::default());
    }

    let cert_file = tls.cert_file.as_ref().context("tls.cert_file missing")?;
    let key_file = tls.key_file.as_ref().context("tls.key_file missing")?;
    let cert_pem = std::fs::read_to_string(cert_file)
        .with_context(|| format!("read {}", cert_file.display()))?;
    let key_pem = std::fs::read_to_string(key_file)
        .with_context(|| format!("read {}", key_file.display()))?;

    let mut ca = Vec::with_capacity(tls.ca_files.len());
    for path in &tls.ca_files {
        let pem =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let info = cert::parse_pem(&pem)
            .with_context(|| format!("parse trust anchor {}", path.display()))?;
        ca.push(TrustedCert {
            common_name: info.subject_cn,
            issuer_cn: info.issuer_cn,
            fingerprint: info.fingerprint,
            pem,
        });
    }
    info!(anchors = ca.len(), "Keystore loaded");

    Ok(Keystore {
        cert_pem,
        key_pem,
        passphrase: None,
        ca,
    })
}

/// Seed data is a plain JSON array; a missing path means an empty store.
fn load_seed<T: serde::de::DeserializeOwned>(
    path: Option<&Path>,
    what: &str,
) -> anyhow::Result<Vec<T>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {} file", what))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {} file {}", what, path.display()))
}

fn resolve_config_path() -> (Option<PathBuf>, ConfigSource) {
    // 1. Check CLI: --config <path>
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (Some(PathBuf::from(path)), ConfigSource::CliArgument);
            }
        }
    }

    // 2. Check environment variable
    if let Ok(path) = std::env::var("HIEGATE_CONFIG") {
        if !path.is_empty() {
            return (Some(PathBuf::from(path)), ConfigSource::EnvironmentVariable);
        }
    }

    // 3. Default to hiegate.toml when it exists; pure defaults otherwise.
    let default = PathBuf::from("hiegate.toml");
    if default.exists() {
        (Some(default), ConfigSource::Default)
    } else {
        (None, ConfigSource::Default)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
        return;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEST_CA_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBiTCCAS+gAwIBAgIUWBPkDPuGfR5sUS7R0TxA/XyYlfgwCgYIKoZIzj0EAwIw
GjEYMBYGA1UEAwwPaGllZ2F0ZS10ZXN0LWNhMB4XDTI2MDgzMDA0NTA0NVoXDTQ2
MDgyNTA0NTA0NVowGjEYMBYGA1UEAwwPaGllZ2F0ZS10ZXN0LWNhMFkwEwYHKoZI
zj0CAQYIKoZIzj0DAQcDQgAEO+g/0JP+j+7LciauUOrmRZDFqsvpyhCvbib7xQpP
wRsSbkuWLcrJBEnSOiGtpUWP0aaEObw55HLiJSpxF3gor6NTMFEwHQYDVR0OBBYE
FJG6xBmkX2/7fqV4WzaStnzAiAopMB8GA1UdIwQYMBaAFJG6xBmkX2/7fqV4WzaS
tnzAiAopMA8GA1UdEwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIhAKToDU2K
ySk6ZzaoD4/5IfiPZkLTD16CZURK/G7CZi/GAiAjB/u5yC9cOkpZNF2/WJa98qBP
gcf2rqvSaIxFYmoIUA==
-----END CERTIFICATE-----
";

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn disabled_tls_yields_an_empty_keystore() {
        let keystore = build_keystore(&TlsConfig::default()).unwrap();
        assert!(keystore.cert_pem.is_empty());
        assert!(keystore.ca.is_empty());
    }

    #[test]
    fn trust_anchor_facts_are_precomputed() {
        let cert = write_temp(TEST_CA_PEM);
        let key = write_temp("not a key, never parsed at load time");
        let tls = TlsConfig {
            enabled: true,
            cert_file: Some(cert.path().to_path_buf()),
            key_file: Some(key.path().to_path_buf()),
            ca_files: vec![cert.path().to_path_buf()],
            client_lookup: Default::default(),
        };

        let keystore = build_keystore(&tls).unwrap();
        assert_eq!(keystore.ca.len(), 1);
        let anchor = &keystore.ca[0];
        assert_eq!(anchor.common_name, "hiegate-test-ca");
        // Self-signed: the precomputed issuer equals the subject.
        assert_eq!(anchor.issuer_cn, "hiegate-test-ca");
        assert_eq!(
            anchor.fingerprint,
            "d5:d1:ca:ff:59:02:1c:bb:69:fc:d1:97:dc:da:c5:a7:4f:00:2f:4c"
        );
        assert_eq!(anchor.pem, TEST_CA_PEM);
    }
}
