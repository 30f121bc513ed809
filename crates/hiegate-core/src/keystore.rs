//! Keystore snapshot types.
//!
//! The keystore is owned by an external certificate-management collaborator;
//! the gateway only ever reads full consistent snapshots of it (hot-swaps
//! replace the whole `Arc`, never mutate in place).

use serde::{Deserialize, Serialize};

/// One trust-anchor certificate, with its identity facts precomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedCert {
    pub common_name: String,
    pub issuer_cn: String,

    /// Lowercase colon-hex SHA-1 of the certificate DER bytes.
    pub fingerprint: String,

    /// PEM-encoded certificate.
    pub pem: String,
}

/// Server certificate material plus the ordered trust-anchor list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keystore {
    pub cert_pem: String,
    pub key_pem: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Trust anchors, in configured order. Order matters: the client
    /// resolver takes the first anchor matching an issuer common name.
    #[serde(default)]
    pub ca: Vec<TrustedCert>,
}

impl Keystore {
    /// First trust anchor whose common name equals `cn`.
    pub fn anchor_by_cn(&self, cn: &str) -> Option<&TrustedCert> {
        self.ca.iter().find(|c| c.common_name == cn)
    }
}
