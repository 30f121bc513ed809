//! The hiegate server: configuration, listeners, and the staged request
//! pipeline wired around the routing engine.

pub mod config;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod tls;

pub use config::{AppConfig, load_config};
pub use server::{AppState, ConnectionMeta, PeerAuth, build_router};
pub use store::{AllowListAuthorizer, LoggingRecorder, MemoryChannelStore, SwappableKeystore};
