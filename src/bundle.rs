//! Identity bundle value object
//!
//! A [`KeyCertBundle`] is one complete mesh identity: private key, leaf
//! certificate, optional intermediate chain, and the trust root(s) the chain
//! terminates at. Bundles are verified at construction — a key that does not
//! match its certificate, or a chain that does not reach the bundled root, is
//! unrepresentable. Once built a bundle is immutable; rotation supersedes it
//! with a new one rather than mutating in place.

use std::fmt;
use std::path::Path;

use rcgen::{KeyPair, PublicKeyData};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::pki::{self, CertificateInfo};
use crate::Result;

/// One complete identity: private key, leaf cert, chain, and trust root
pub struct KeyCertBundle {
    cert_pem: Vec<u8>,
    key_pem: Zeroizing<Vec<u8>>,
    cert_chain_pem: Vec<u8>,
    ca_bundle_pem: Vec<u8>,
}

impl KeyCertBundle {
    /// Construct and verify a bundle
    ///
    /// `cert_pem` may carry the full chain (leaf first); `cert_chain_pem`
    /// holds any further intermediates and may be empty. When
    /// `ca_bundle_pem` is non-empty the whole chain must validate against
    /// it. Fails with [`Error::KeyMismatch`] or [`Error::ChainInvalid`]
    /// without constructing anything.
    pub fn new(
        cert_pem: Vec<u8>,
        key_pem: Vec<u8>,
        cert_chain_pem: Vec<u8>,
        ca_bundle_pem: Vec<u8>,
    ) -> Result<Self> {
        Self::verify(&key_pem, &cert_pem)?;

        if !ca_bundle_pem.is_empty() {
            let mut chain = pki::certs_from_pem(&cert_pem)?;
            if !cert_chain_pem.is_empty() {
                chain.extend(pki::certs_from_pem(&cert_chain_pem)?);
            }
            let roots = pki::certs_from_pem(&ca_bundle_pem)?;
            pki::verify_chain_of_trust(&chain, &roots)?;
        }

        Ok(Self {
            cert_pem,
            key_pem: Zeroizing::new(key_pem),
            cert_chain_pem,
            ca_bundle_pem,
        })
    }

    /// Read key, cert, and CA root from disk and construct a verified bundle
    ///
    /// Fails with [`Error::Io`] naming the unreadable path, or with the
    /// verification errors of [`KeyCertBundle::new`].
    pub async fn from_files(key_file: &Path, cert_file: &Path, ca_file: &Path) -> Result<Self> {
        let key = tokio::fs::read(key_file)
            .await
            .map_err(|e| Error::io(key_file, e))?;
        let cert = tokio::fs::read(cert_file)
            .await
            .map_err(|e| Error::io(cert_file, e))?;
        let ca = tokio::fs::read(ca_file)
            .await
            .map_err(|e| Error::io(ca_file, e))?;
        Self::new(cert, key, Vec::new(), ca)
    }

    /// Check that a private key corresponds to a certificate's public key
    ///
    /// Compares the key pair's SubjectPublicKeyInfo against the one embedded
    /// in the leaf certificate.
    pub fn verify(key_pem: &[u8], cert_pem: &[u8]) -> Result<()> {
        let key_str = std::str::from_utf8(key_pem)
            .map_err(|_| Error::parse("private key is not valid UTF-8"))?;
        let key = KeyPair::from_pem(key_str)
            .map_err(|e| Error::parse(format!("failed to parse private key: {}", e)))?;

        let certs = pki::certs_from_pem(cert_pem)?;
        let (_, leaf) = X509Certificate::from_der(&certs[0])
            .map_err(|e| Error::parse(format!("failed to parse certificate: {}", e)))?;

        if key.subject_public_key_info().as_slice() != leaf.public_key().raw {
            return Err(Error::key_mismatch(
                "certificate public key differs from key pair",
            ));
        }
        Ok(())
    }

    /// Leaf certificate PEM (may carry the full chain, leaf first)
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Private key PEM
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    /// Intermediate chain PEM; empty when the leaf chains directly to a root
    pub fn chain_pem(&self) -> &[u8] {
        &self.cert_chain_pem
    }

    /// Trust root bundle PEM
    pub fn root_pem(&self) -> &[u8] {
        &self.ca_bundle_pem
    }

    /// Identity and validity details of the leaf certificate
    pub fn certificate_info(&self) -> Result<CertificateInfo> {
        let certs = pki::certs_from_pem(&self.cert_pem)?;
        CertificateInfo::from_der(&certs[0])
    }
}

impl fmt::Debug for KeyCertBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCertBundle")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .field("cert_chain_pem_len", &self.cert_chain_pem.len())
            .field("ca_bundle_pem_len", &self.ca_bundle_pem.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use std::io::Write;
    use std::time::Duration;

    fn test_ca(name: &str) -> CertificateAuthority {
        CertificateAuthority::new(name, Duration::from_secs(3600 * 24 * 365))
            .expect("CA creation should succeed")
    }

    fn issued(ca: &CertificateAuthority) -> KeyCertBundle {
        ca.issue_key_cert(
            &["workload.filament-system.svc".to_string()],
            Duration::from_secs(3600),
            false,
        )
        .expect("issuance should succeed")
    }

    #[test]
    fn matching_key_and_cert_construct_a_bundle() {
        let ca = test_ca("Bundle CA");
        let bundle = issued(&ca);

        // Round-trip through the public constructor
        let rebuilt = KeyCertBundle::new(
            bundle.cert_pem().to_vec(),
            bundle.key_pem().to_vec(),
            Vec::new(),
            bundle.root_pem().to_vec(),
        )
        .expect("verified material should reconstruct");

        assert_eq!(rebuilt.cert_pem(), bundle.cert_pem());
        assert_eq!(rebuilt.root_pem(), bundle.root_pem());
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let ca = test_ca("Mismatch CA");
        let first = issued(&ca);
        let second = issued(&ca);

        // Second bundle's key against first bundle's cert
        let result = KeyCertBundle::new(
            first.cert_pem().to_vec(),
            second.key_pem().to_vec(),
            Vec::new(),
            first.root_pem().to_vec(),
        );
        assert!(matches!(result, Err(Error::KeyMismatch(_))));
    }

    #[test]
    fn chain_that_misses_the_root_is_rejected() {
        let ca = test_ca("Issuing CA");
        let stranger = test_ca("Stranger CA");
        let bundle = issued(&ca);

        let result = KeyCertBundle::new(
            bundle.cert_pem().to_vec(),
            bundle.key_pem().to_vec(),
            Vec::new(),
            stranger.ca_cert_pem().as_bytes().to_vec(),
        );
        assert!(matches!(result, Err(Error::ChainInvalid(_))));
    }

    #[test]
    fn empty_root_skips_chain_validation() {
        let ca = test_ca("Rootless CA");
        let bundle = issued(&ca);

        let rebuilt = KeyCertBundle::new(
            bundle.cert_pem().to_vec(),
            bundle.key_pem().to_vec(),
            Vec::new(),
            Vec::new(),
        )
        .expect("bundle without a root should construct");
        assert!(rebuilt.root_pem().is_empty());
    }

    #[test]
    fn garbage_key_is_a_parse_error_not_a_panic() {
        let ca = test_ca("Garbage CA");
        let bundle = issued(&ca);

        let result = KeyCertBundle::new(
            bundle.cert_pem().to_vec(),
            b"not a key".to_vec(),
            Vec::new(),
            bundle.root_pem().to_vec(),
        );
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn certificate_info_describes_the_leaf() {
        let ca = test_ca("Info CA");
        let bundle = issued(&ca);
        let info = bundle.certificate_info().expect("info should parse");

        assert!(!info.serial.is_empty());
        assert!(info.lifetime_secs() >= 3600 - 1);
    }

    #[test]
    fn debug_output_redacts_the_private_key() {
        let ca = test_ca("Redact CA");
        let bundle = issued(&ca);

        let rendered = format!("{:?}", bundle);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn from_files_loads_and_verifies() {
        let ca = test_ca("File CA");
        let bundle = issued(&ca);

        let mut key_file = tempfile::NamedTempFile::new().expect("temp file");
        key_file.write_all(bundle.key_pem()).expect("write key");
        let mut cert_file = tempfile::NamedTempFile::new().expect("temp file");
        cert_file.write_all(bundle.cert_pem()).expect("write cert");
        let mut ca_file = tempfile::NamedTempFile::new().expect("temp file");
        ca_file
            .write_all(bundle.root_pem())
            .expect("write ca bundle");

        let loaded = KeyCertBundle::from_files(key_file.path(), cert_file.path(), ca_file.path())
            .await
            .expect("file load should succeed");
        assert_eq!(loaded.cert_pem(), bundle.cert_pem());
        assert_eq!(loaded.key_pem(), bundle.key_pem());
    }

    #[tokio::test]
    async fn from_files_reports_the_missing_path() {
        let ca = test_ca("Missing CA");
        let bundle = issued(&ca);

        let mut cert_file = tempfile::NamedTempFile::new().expect("temp file");
        cert_file.write_all(bundle.cert_pem()).expect("write cert");
        let mut ca_file = tempfile::NamedTempFile::new().expect("temp file");
        ca_file
            .write_all(bundle.root_pem())
            .expect("write ca bundle");

        let missing = Path::new("/nonexistent/identity/key.pem");
        let result = KeyCertBundle::from_files(missing, cert_file.path(), ca_file.path()).await;
        match result {
            Err(Error::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }
}
