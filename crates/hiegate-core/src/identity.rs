//! Client identity types produced by certificate resolution and consumed by
//! authorization.

use serde::{Deserialize, Serialize};

/// A registered client of the exchange, as stored by the configuration
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Lowercase colon-hex SHA-1 fingerprint of the client's certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_fingerprint: Option<String>,
}

/// Resolved caller identity. Immutable for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    pub client_id: String,
    pub roles: Vec<String>,
    pub fingerprint: String,
}

impl ClientIdentity {
    /// Build an identity from the client record matched during resolution.
    pub fn from_record(record: &ClientRecord, fingerprint: &str) -> Self {
        Self {
            client_id: record.client_id.clone(),
            roles: record.roles.clone(),
            fingerprint: fingerprint.to_string(),
        }
    }
}

/// The facts the TLS accept loop extracts from a peer certificate, used as
/// the resolver's starting point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    pub fingerprint: String,
    pub subject_cn: String,
    pub issuer_cn: String,
}
