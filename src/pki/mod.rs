//! X.509 toolbox for the identity plane
//!
//! Parsing and verification helpers shared by bundle construction, the
//! certificate providers, and the rotation engine. Certificate material is
//! PEM at rest and on the wire; DER appears only transiently for parsing and
//! signature checks.
//!
//! # Chain validation
//!
//! A chain is validated leaf-first: every certificate must be signed by its
//! successor, and the final certificate must either be one of the trust roots
//! or be signed by one of them. Expiry is deliberately not checked here —
//! freshness is the rotation engine's responsibility, and rejecting an
//! expired-but-consistent bundle at load time would leave a process with no
//! identity at all.

use crate::error::Error;
use crate::Result;
use x509_parser::prelude::*;

/// Parse the first PEM block and return its DER contents
pub fn parse_pem(pem_data: &[u8]) -> Result<Vec<u8>> {
    let block = ::pem::parse(pem_data)
        .map_err(|e| Error::parse(format!("failed to parse PEM: {}", e)))?;
    Ok(block.contents().to_vec())
}

/// Parse every CERTIFICATE block in the input and return their DER contents
///
/// Non-certificate blocks (keys, CSRs) are skipped. Fails if the input holds
/// no certificate at all.
pub fn certs_from_pem(pem_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let blocks = ::pem::parse_many(pem_data)
        .map_err(|e| Error::parse(format!("failed to parse PEM: {}", e)))?;
    let ders: Vec<Vec<u8>> = blocks
        .iter()
        .filter(|b| b.tag() == "CERTIFICATE")
        .map(|b| b.contents().to_vec())
        .collect();
    if ders.is_empty() {
        return Err(Error::parse("no certificate blocks found"));
    }
    Ok(ders)
}

/// Re-encode a DER certificate as a single PEM block
pub fn der_to_pem(der: &[u8]) -> Vec<u8> {
    let block = ::pem::Pem::new("CERTIFICATE", der.to_vec());
    let config = ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF);
    ::pem::encode_config(&block, config).into_bytes()
}

/// Check whether `cert_der` carries a valid signature from `issuer_der`
fn verify_signed_by(cert_der: &[u8], issuer_der: &[u8]) -> Result<bool> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::parse(format!("failed to parse certificate: {}", e)))?;
    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| Error::parse(format!("failed to parse issuer certificate: {}", e)))?;
    Ok(cert.verify_signature(Some(issuer.public_key())).is_ok())
}

/// Validate a leaf-first certificate chain against a set of trust roots
///
/// Every certificate must be signed by its successor; the final certificate
/// must be one of `root_ders` or be signed by one of them.
pub fn verify_chain_of_trust(chain_ders: &[Vec<u8>], root_ders: &[Vec<u8>]) -> Result<()> {
    if chain_ders.is_empty() {
        return Err(Error::chain_invalid("empty certificate chain"));
    }
    if root_ders.is_empty() {
        return Err(Error::chain_invalid("no trust roots to validate against"));
    }

    for pair in chain_ders.windows(2) {
        if !verify_signed_by(&pair[0], &pair[1])? {
            return Err(Error::chain_invalid(
                "certificate is not signed by its issuer",
            ));
        }
    }

    let last = &chain_ders[chain_ders.len() - 1];
    for root in root_ders {
        if root == last || verify_signed_by(last, root)? {
            return Ok(());
        }
    }
    Err(Error::chain_invalid(
        "chain does not terminate at any bundled root",
    ))
}

/// Check that `root_pem` actually terminates the given chain
///
/// Used when a root was resolved out-of-band (mesh config, chain extraction)
/// and must be cross-checked before it is trusted.
pub fn root_terminates_chain(chain_pem: &[u8], root_pem: &[u8]) -> Result<()> {
    let chain = certs_from_pem(chain_pem)?;
    let roots = certs_from_pem(root_pem)?;
    verify_chain_of_trust(&chain, &roots)
        .map_err(|e| Error::root_verify(format!("root does not terminate chain: {}", e)))
}

/// Extract the trust root from a certificate chain
///
/// Returns the last CERTIFICATE block re-encoded as PEM. The block must carry
/// CA basic constraints; a chain ending in a leaf has no root to offer.
pub fn find_root_in_chain(chain_pem: &[u8]) -> Result<Vec<u8>> {
    let ders = certs_from_pem(chain_pem)?;
    let last = &ders[ders.len() - 1];
    let (_, cert) = X509Certificate::from_der(last)
        .map_err(|e| Error::parse(format!("failed to parse certificate: {}", e)))?;
    let is_ca = cert
        .basic_constraints()
        .map_err(|e| Error::parse(format!("failed to read basic constraints: {}", e)))?
        .map(|bc| bc.value.ca)
        .unwrap_or(false);
    if !is_ca {
        return Err(Error::root_verify(
            "last certificate in chain is not a CA certificate",
        ));
    }
    Ok(der_to_pem(last))
}

/// Current Unix time in seconds
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after 1970")
        .as_secs() as i64
}

/// Information about a certificate's identity and validity window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// Serial number as colon-separated hex
    pub serial: String,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    ///
    /// When the input holds several certificates the first one (the leaf)
    /// is described.
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::parse(format!("failed to parse certificate: {}", e)))?;

        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let serial = cert.raw_serial_as_string();

        Ok(Self {
            not_before,
            not_after,
            common_name,
            serial,
        })
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }

    /// Seconds remaining until the certificate expires
    pub fn remaining_secs(&self) -> i64 {
        self.not_after - unix_now()
    }

    /// Check if the certificate has expired
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }

    /// Time to wait before the certificate should be rotated
    ///
    /// `wait = lifetime * grace_period_ratio - elapsed_since_not_before`,
    /// floored at zero: an identity past the configured fraction of its
    /// validity window (or already expired, or with a nonsense validity
    /// window) is due immediately.
    pub fn rotation_wait(&self, grace_period_ratio: f64, now: i64) -> std::time::Duration {
        let lifetime = self.lifetime_secs() as f64;
        let elapsed = (now - self.not_before) as f64;
        let wait = lifetime * grace_period_ratio - elapsed;
        if wait <= 0.0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_secs_f64(wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use std::time::Duration;

    fn test_ca(name: &str) -> CertificateAuthority {
        CertificateAuthority::new(name, Duration::from_secs(3600 * 24 * 365))
            .expect("CA creation should succeed")
    }

    // ==========================================================================
    // PEM parsing
    // ==========================================================================

    #[test]
    fn parse_pem_returns_der_contents() {
        let ca = test_ca("Parse CA");
        let der = parse_pem(ca.ca_cert_pem().as_bytes()).expect("PEM parsing should succeed");
        assert!(!der.is_empty());

        // DER must itself parse as a certificate
        let info = CertificateInfo::from_der(&der).expect("DER should be a certificate");
        assert_eq!(info.common_name, "Parse CA");
    }

    #[test]
    fn certs_from_pem_splits_concatenated_blocks() {
        let ca1 = test_ca("First CA");
        let ca2 = test_ca("Second CA");
        let combined = format!("{}{}", ca1.ca_cert_pem(), ca2.ca_cert_pem());

        let ders = certs_from_pem(combined.as_bytes()).expect("multi-block parse should succeed");
        assert_eq!(ders.len(), 2);
    }

    #[test]
    fn certs_from_pem_rejects_input_without_certificates() {
        let result = certs_from_pem(b"not pem at all");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn der_to_pem_round_trips() {
        let ca = test_ca("Round Trip CA");
        let der = parse_pem(ca.ca_cert_pem().as_bytes()).expect("PEM parsing should succeed");
        let pem = der_to_pem(&der);
        let der2 = parse_pem(&pem).expect("re-encoded PEM should parse");
        assert_eq!(der, der2);
    }

    // ==========================================================================
    // Chain validation
    // ==========================================================================

    #[test]
    fn chain_to_issuing_root_validates() {
        let ca = test_ca("Chain CA");
        let bundle = ca
            .issue_key_cert(
                &["workload.filament-system.svc".to_string()],
                Duration::from_secs(3600),
                false,
            )
            .expect("issuance should succeed");

        let leaf = certs_from_pem(bundle.cert_pem()).expect("leaf should parse");
        let roots = certs_from_pem(ca.ca_cert_pem().as_bytes()).expect("root should parse");
        verify_chain_of_trust(&leaf, &roots).expect("chain should validate against issuing root");
    }

    #[test]
    fn chain_against_wrong_root_is_rejected() {
        let ca = test_ca("Real CA");
        let other = test_ca("Other CA");
        let bundle = ca
            .issue_key_cert(
                &["workload.filament-system.svc".to_string()],
                Duration::from_secs(3600),
                false,
            )
            .expect("issuance should succeed");

        let leaf = certs_from_pem(bundle.cert_pem()).expect("leaf should parse");
        let roots = certs_from_pem(other.ca_cert_pem().as_bytes()).expect("root should parse");
        let result = verify_chain_of_trust(&leaf, &roots);
        assert!(matches!(result, Err(Error::ChainInvalid(_))));
    }

    #[test]
    fn chain_containing_the_root_itself_validates() {
        let ca = test_ca("Self Root CA");
        let root_der = parse_pem(ca.ca_cert_pem().as_bytes()).expect("root should parse");

        // A chain whose last element is the root certificate itself
        let chain = vec![root_der.clone()];
        verify_chain_of_trust(&chain, &[root_der]).expect("root-only chain should validate");
    }

    #[test]
    fn empty_chain_is_rejected() {
        let ca = test_ca("Empty Chain CA");
        let roots = certs_from_pem(ca.ca_cert_pem().as_bytes()).expect("root should parse");
        assert!(matches!(
            verify_chain_of_trust(&[], &roots),
            Err(Error::ChainInvalid(_))
        ));
    }

    #[test]
    fn root_extraction_finds_trailing_ca_certificate() {
        let ca = test_ca("Extract CA");
        let bundle = ca
            .issue_key_cert(
                &["workload.filament-system.svc".to_string()],
                Duration::from_secs(3600),
                false,
            )
            .expect("issuance should succeed");

        let chain = [bundle.cert_pem(), ca.ca_cert_pem().as_bytes()].concat();
        let root = find_root_in_chain(&chain).expect("root extraction should succeed");

        let extracted = parse_pem(&root).expect("extracted root should parse");
        let expected = parse_pem(ca.ca_cert_pem().as_bytes()).expect("CA cert should parse");
        assert_eq!(extracted, expected);
    }

    #[test]
    fn root_extraction_rejects_leaf_only_chain() {
        let ca = test_ca("Leaf Only CA");
        let bundle = ca
            .issue_key_cert(
                &["workload.filament-system.svc".to_string()],
                Duration::from_secs(3600),
                false,
            )
            .expect("issuance should succeed");

        let result = find_root_in_chain(bundle.cert_pem());
        assert!(matches!(result, Err(Error::RootVerify(_))));
    }

    #[test]
    fn cross_check_accepts_matching_root_and_rejects_stranger() {
        let ca = test_ca("Cross CA");
        let stranger = test_ca("Stranger CA");
        let bundle = ca
            .issue_key_cert(
                &["workload.filament-system.svc".to_string()],
                Duration::from_secs(3600),
                false,
            )
            .expect("issuance should succeed");

        root_terminates_chain(bundle.cert_pem(), ca.ca_cert_pem().as_bytes())
            .expect("issuing root should terminate the chain");

        let result = root_terminates_chain(bundle.cert_pem(), stranger.ca_cert_pem().as_bytes());
        assert!(matches!(result, Err(Error::RootVerify(_))));
    }

    // ==========================================================================
    // Certificate info and rotation math
    // ==========================================================================

    #[test]
    fn certificate_info_reports_identity_fields() {
        let ca = test_ca("Info CA");
        let info = ca.cert_info().expect("cert info should parse");

        assert_eq!(info.common_name, "Info CA");
        assert!(!info.serial.is_empty());
        assert!(info.lifetime_secs() > 0);
        assert!(!info.is_expired());
    }

    #[test]
    fn serial_numbers_differ_across_issuances() {
        let ca = test_ca("Serial CA");
        let names = vec!["workload.filament-system.svc".to_string()];
        let first = ca
            .issue_key_cert(&names, Duration::from_secs(3600), false)
            .expect("first issuance should succeed");
        let second = ca
            .issue_key_cert(&names, Duration::from_secs(3600), false)
            .expect("second issuance should succeed");

        let s1 = CertificateInfo::from_pem(first.cert_pem()).expect("info").serial;
        let s2 = CertificateInfo::from_pem(second.cert_pem()).expect("info").serial;
        assert_ne!(s1, s2);
    }

    #[test]
    fn rotation_wait_targets_the_validity_midpoint() {
        // Cert valid from T0 for 2 hours, default ratio: rotation at T0+1h
        let info = CertificateInfo {
            not_before: 1_000,
            not_after: 1_000 + 7_200,
            common_name: String::new(),
            serial: String::new(),
        };

        assert_eq!(
            info.rotation_wait(0.5, 1_000),
            std::time::Duration::from_secs(3_600)
        );
        // 20 minutes in: 40 minutes left on the clock
        assert_eq!(
            info.rotation_wait(0.5, 2_200),
            std::time::Duration::from_secs(2_400)
        );
    }

    #[test]
    fn rotation_wait_floors_at_zero() {
        let info = CertificateInfo {
            not_before: 1_000,
            not_after: 1_000 + 7_200,
            common_name: String::new(),
            serial: String::new(),
        };

        // Exactly at the midpoint
        assert_eq!(info.rotation_wait(0.5, 4_600), std::time::Duration::ZERO);
        // Long past expiry
        assert_eq!(info.rotation_wait(0.5, 20_000), std::time::Duration::ZERO);
        // Degenerate validity window
        let broken = CertificateInfo {
            not_before: 5_000,
            not_after: 4_000,
            common_name: String::new(),
            serial: String::new(),
        };
        assert_eq!(broken.rotation_wait(0.5, 5_000), std::time::Duration::ZERO);
    }

    #[test]
    fn rotation_wait_respects_the_configured_ratio() {
        let info = CertificateInfo {
            not_before: 0,
            not_after: 10_000,
            common_name: String::new(),
            serial: String::new(),
        };

        // An 80% ratio rotates much later than the midpoint
        assert_eq!(
            info.rotation_wait(0.8, 0),
            std::time::Duration::from_secs(8_000)
        );
        assert_eq!(
            info.rotation_wait(0.8, 7_000),
            std::time::Duration::from_secs(1_000)
        );
    }
}
