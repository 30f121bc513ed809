//! Certificate metadata extraction.
//!
//! Parse failures are surfaced as [`CoreError::Certificate`], never treated
//! as a silent no-match: the resolver must know the difference between "not
//! a known client" and "could not read the certificate".

use sha1::{Digest, Sha1};
use x509_parser::prelude::*;

use crate::error::{CoreError, Result};

/// Identity facts extracted from one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Lowercase colon-hex SHA-1 of the DER bytes.
    pub fingerprint: String,
    pub subject_cn: String,
    pub issuer_cn: String,
}

/// Lowercase colon-hex SHA-1 fingerprint of raw DER bytes.
pub fn fingerprint_hex(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Extract identity facts from a DER-encoded certificate.
pub fn parse_der(der: &[u8]) -> Result<CertificateInfo> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CoreError::certificate(format!("failed to parse certificate: {e}")))?;

    Ok(CertificateInfo {
        fingerprint: fingerprint_hex(der),
        subject_cn: common_name(cert.subject())?,
        issuer_cn: common_name(cert.issuer())?,
    })
}

/// Extract identity facts from a PEM-encoded certificate.
pub fn parse_pem(pem: &str) -> Result<CertificateInfo> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| CoreError::certificate(format!("failed to parse PEM: {e}")))?;
    parse_der(&parsed.contents)
}

fn common_name(name: &X509Name<'_>) -> Result<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::certificate("certificate has no common name".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_colon_hex_sha1() {
        // SHA-1 of the empty input is well known.
        let fp = fingerprint_hex(&[]);
        assert_eq!(
            fp,
            "da:39:a3:ee:5e:6b:4b:0d:32:55:bf:ef:95:60:18:90:af:d8:07:09"
        );
    }

    #[test]
    fn garbage_pem_is_an_error() {
        let err = parse_pem("not a certificate").unwrap_err();
        assert!(matches!(err, CoreError::Certificate(_)));
    }
}
