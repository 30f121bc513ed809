//! Contracts for the external collaborators the gateway core depends on.
//!
//! The engine never talks to a database or queue directly; it consumes
//! read-only snapshots from these traits and hands its results back through
//! them. Implementations must be thread-safe (`Send + Sync`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::dispatch::DispatchResult;
use crate::error::Result;
use crate::identity::{ClientIdentity, ClientRecord};
use crate::keystore::Keystore;

/// Read-only access to the configured channels and registered clients.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// The full channel list, ordered by ascending priority. The returned
    /// snapshot is immutable for the duration of the request.
    async fn channels(&self) -> Result<Vec<Channel>>;

    /// A single channel by id, if it exists.
    async fn channel(&self, id: &str) -> Result<Option<Channel>>;

    /// All registered client records.
    async fn clients(&self) -> Result<Vec<ClientRecord>>;
}

/// Read-only access to the current keystore.
///
/// Reads must return a full consistent snapshot even while a
/// certificate-management collaborator hot-swaps the keystore concurrently;
/// implementations swap the `Arc` atomically rather than locking.
#[async_trait]
pub trait KeystoreProvider: Send + Sync {
    async fn keystore(&self) -> Result<Arc<Keystore>>;
}

/// Allow/deny decision for a resolved identity against a matched channel.
/// Called between matching and dispatch.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, identity: Option<&ClientIdentity>, channel: &Channel) -> bool;
}

/// Sink for completed dispatch results.
///
/// Receives the result as an immutable value after every route has settled;
/// persistence, statistics, and alerting live behind this trait.
#[async_trait]
pub trait TransactionRecorder: Send + Sync {
    async fn record(&self, channel: &Channel, result: &DispatchResult);
}
