//! Server configuration: TOML-loaded sections with per-field defaults and
//! an explicit validation pass before anything binds a socket.

use std::path::{Path, PathBuf};

use hiegate_engine::LookupMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Seed data for the in-memory stores.
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    /// Hostname clients reach the gateway on; rewritten URLs point here.
    #[serde(default = "default_external_hostname")]
    pub external_hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            https_port: default_https_port(),
            external_hostname: default_external_hostname(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Trust-anchor certificates accepted for client authentication.
    #[serde(default)]
    pub ca_files: Vec<PathBuf>,
    /// How far certificate-to-client lookup may climb the trust chain.
    #[serde(default)]
    pub client_lookup: LookupMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_correlation_header")]
    pub correlation_header: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            correlation_header: default_correlation_header(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON file holding the channel list.
    pub channels_file: Option<PathBuf>,
    /// JSON file holding the registered client records.
    pub clients_file: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    5001
}
fn default_https_port() -> u16 {
    5000
}
fn default_external_hostname() -> String {
    "localhost".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_correlation_header() -> String {
    "x-correlation-id".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.http_port == 0 {
            return Err("server.http_port must be > 0".into());
        }
        if self.server.https_port == 0 {
            return Err("server.https_port must be > 0".into());
        }
        if self.server.http_port == self.server.https_port {
            return Err("server.http_port and server.https_port must differ".into());
        }
        if self.server.external_hostname.is_empty() {
            return Err("server.external_hostname must not be empty".into());
        }
        if self.router.default_timeout_ms == 0 {
            return Err("router.default_timeout_ms must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.tls.enabled {
            if self.tls.cert_file.is_none() {
                return Err("tls.enabled=true requires tls.cert_file".into());
            }
            if self.tls.key_file.is_none() {
                return Err("tls.enabled=true requires tls.key_file".into());
            }
        }
        Ok(())
    }
}

/// Load configuration from a TOML file; a missing path yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, String> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| format!("cannot parse {}: {e}", path.display()))
}
