//! Certificate-to-client resolution, optionally climbing the trust chain.
//!
//! A pure function over in-memory snapshots: no I/O happens inside the
//! walk, the keystore and client records are never mutated, and the walk
//! must complete before the request proceeds past authentication.

use std::collections::HashSet;

use hiegate_core::cert;
use hiegate_core::{ClientIdentity, ClientRecord, Keystore, PeerCertificate, Result, TrustedCert};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How far certificate lookup may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupMode {
    /// Only an exact fingerprint match resolves; chain climbing disabled.
    Strict,
    /// Unknown fingerprints climb issuer-by-issuer through the trust
    /// anchors until a known fingerprint is found or the chain ends.
    InChain,
}

impl Default for LookupMode {
    fn default() -> Self {
        LookupMode::Strict
    }
}

/// Resolves a peer certificate to a registered client identity.
#[derive(Debug, Clone, Copy)]
pub struct ClientResolver {
    mode: LookupMode,
}

impl ClientResolver {
    pub fn new(mode: LookupMode) -> Self {
        Self { mode }
    }

    /// Resolve a peer certificate to a client identity, or `None` when no
    /// registered client is reachable from it.
    ///
    /// Certificate metadata parse failures propagate as errors; they are
    /// never folded into `None`.
    pub fn resolve(
        &self,
        peer: &PeerCertificate,
        keystore: &Keystore,
        clients: &[ClientRecord],
    ) -> Result<Option<ClientIdentity>> {
        let mut fingerprint = peer.fingerprint.clone();
        let mut subject_cn = peer.subject_cn.clone();
        let mut issuer_cn = peer.issuer_cn.clone();
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            if let Some(record) = clients
                .iter()
                .find(|c| c.cert_fingerprint.as_deref() == Some(fingerprint.as_str()))
            {
                debug!(client_id = %record.client_id, %fingerprint, "resolved client certificate");
                return Ok(Some(ClientIdentity::from_record(record, &fingerprint)));
            }

            // Self-signed or chain root reached: nothing left to climb.
            if subject_cn == issuer_cn {
                return Ok(None);
            }

            if self.mode == LookupMode::Strict {
                return Ok(None);
            }

            if !visited.insert(fingerprint.clone()) {
                warn!(%fingerprint, "trust chain contains a cycle, aborting lookup");
                return Ok(None);
            }

            let Some(anchor) = keystore.anchor_by_cn(&issuer_cn) else {
                debug!(%issuer_cn, "issuer not found among trust anchors");
                return Ok(None);
            };

            subject_cn = anchor.common_name.clone();
            issuer_cn = anchor_issuer(anchor)?;
            fingerprint = anchor.fingerprint.clone();
        }
    }
}

/// The issuer common name of a trust anchor: the precomputed field when the
/// keystore collaborator filled it in, otherwise read from the certificate
/// itself. Parse failures propagate.
fn anchor_issuer(anchor: &TrustedCert) -> Result<String> {
    if !anchor.issuer_cn.is_empty() {
        return Ok(anchor.issuer_cn.clone());
    }
    Ok(cert::parse_pem(&anchor.pem)?.issuer_cn)
}
