//! Application state and router assembly.

use std::sync::Arc;

use axum::{Router, routing::any};
use hiegate_core::{Authorizer, ChannelStore, KeystoreProvider, PeerCertificate, TransactionRecorder};
use hiegate_engine::{ClientResolver, DispatchConfig, Dispatcher, Rewriter};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::pipeline;

/// Per-connection facts injected by the accept loops and read by the
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMeta {
    /// Whether the client reached us over TLS; selects the external port
    /// auto-derived rewrite rules target.
    pub secured: bool,
    pub peer: PeerAuth,
}

/// What the TLS session told us about the caller.
#[derive(Debug, Clone, Default)]
pub enum PeerAuth {
    /// No client certificate presented (or plain HTTP).
    #[default]
    Anonymous,
    Certificate(PeerCertificate),
    /// A certificate was presented but its metadata could not be read;
    /// the request is rejected rather than treated as anonymous.
    Invalid(String),
}

/// Shared state for the request pipeline.
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<dyn ChannelStore>,
    pub keystore: Arc<dyn KeystoreProvider>,
    pub authorizer: Arc<dyn Authorizer>,
    pub recorder: Arc<dyn TransactionRecorder>,
    pub resolver: ClientResolver,
    pub dispatcher: Dispatcher,
    pub rewriter: Rewriter,
}

impl AppState {
    /// Wire the engine components from configuration; stores are supplied
    /// by the caller so tests can inject their own.
    pub fn new(
        config: &AppConfig,
        channels: Arc<dyn ChannelStore>,
        keystore: Arc<dyn KeystoreProvider>,
        authorizer: Arc<dyn Authorizer>,
        recorder: Arc<dyn TransactionRecorder>,
    ) -> Self {
        Self {
            channels,
            keystore,
            authorizer,
            recorder,
            resolver: ClientResolver::new(config.tls.client_lookup),
            dispatcher: Dispatcher::new(DispatchConfig {
                default_timeout_ms: config.router.default_timeout_ms,
                correlation_header: config.router.correlation_header.clone(),
            }),
            rewriter: Rewriter {
                external_hostname: config.server.external_hostname.clone(),
                http_port: config.server.http_port,
                https_port: config.server.https_port,
            },
        }
    }
}

/// Every path belongs to the gateway pipeline; there are no fixed routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(pipeline::handle))
        .route("/{*path}", any(pipeline::handle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
