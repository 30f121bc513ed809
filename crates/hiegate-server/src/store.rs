//! In-memory collaborator implementations.
//!
//! Production deployments put the channel/client configuration and the
//! transaction sink behind external services; these implementations cover
//! standalone operation and tests.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use hiegate_core::{
    Authorizer, Channel, ChannelStore, ClientIdentity, ClientRecord, DispatchResult, Keystore,
    KeystoreProvider, Result, TransactionRecorder,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Channel and client snapshots held in memory.
pub struct MemoryChannelStore {
    channels: RwLock<Vec<Channel>>,
    clients: RwLock<Vec<ClientRecord>>,
}

impl MemoryChannelStore {
    pub fn new(channels: Vec<Channel>, clients: Vec<ClientRecord>) -> Self {
        Self {
            channels: RwLock::new(channels),
            clients: RwLock::new(clients),
        }
    }

    pub async fn set_channels(&self, channels: Vec<Channel>) {
        *self.channels.write().await = channels;
    }

    pub async fn set_clients(&self, clients: Vec<ClientRecord>) {
        *self.clients.write().await = clients;
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn channels(&self) -> Result<Vec<Channel>> {
        let mut snapshot = self.channels.read().await.clone();
        snapshot.sort_by_key(|c| c.priority);
        Ok(snapshot)
    }

    async fn channel(&self, id: &str) -> Result<Option<Channel>> {
        Ok(self
            .channels
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn clients(&self) -> Result<Vec<ClientRecord>> {
        Ok(self.clients.read().await.clone())
    }
}

/// Keystore provider backed by an atomically swappable snapshot: readers
/// always see a full consistent keystore even while the certificate
/// collaborator replaces it.
pub struct SwappableKeystore {
    inner: ArcSwap<Keystore>,
}

impl SwappableKeystore {
    pub fn new(keystore: Keystore) -> Self {
        Self {
            inner: ArcSwap::from_pointee(keystore),
        }
    }

    /// Replace the whole keystore in one atomic step.
    pub fn swap(&self, keystore: Keystore) {
        self.inner.store(Arc::new(keystore));
    }
}

#[async_trait]
impl KeystoreProvider for SwappableKeystore {
    async fn keystore(&self) -> Result<Arc<Keystore>> {
        Ok(self.inner.load_full())
    }
}

/// Grants access when the channel's allow-list names one of the caller's
/// roles or its client id. A channel with an empty allow-list is open.
pub struct AllowListAuthorizer;

#[async_trait]
impl Authorizer for AllowListAuthorizer {
    async fn authorize(&self, identity: Option<&ClientIdentity>, channel: &Channel) -> bool {
        if channel.allow.is_empty() {
            return true;
        }
        let Some(identity) = identity else {
            debug!(channel = %channel.name, "anonymous caller denied by allow-list");
            return false;
        };
        channel
            .allow
            .iter()
            .any(|entry| *entry == identity.client_id || identity.roles.contains(entry))
    }
}

/// Hands completed dispatch results to the log stream. The real
/// persistence, statistics, and alerting layers live outside this process
/// and consume the same immutable value.
pub struct LoggingRecorder;

#[async_trait]
impl TransactionRecorder for LoggingRecorder {
    async fn record(&self, channel: &Channel, result: &DispatchResult) {
        info!(
            channel = %channel.name,
            status = result.response.status,
            routes = result.routes.len(),
            orchestrations = result.orchestrations.len(),
            auto_retry = result.auto_retry,
            "transaction complete"
        );
        if let Ok(json) = serde_json::to_string(result) {
            debug!(transaction = %json, "transaction detail");
        }
    }
}
