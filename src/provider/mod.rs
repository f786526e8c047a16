//! Certificate provider back-ends
//!
//! Every identity in the mesh obtains its key material through a
//! [`CertProvider`]. The variants cover deployment shapes rather than plug-in
//! points:
//!
//! - [`SelfSignedProvider`] - sign locally with a mesh-managed CA
//! - [`KubernetesCsrProvider`] - submit CSRs to a cluster-level signer
//! - [`ExternalRaProvider`] - submit CSRs to an external registration authority
//! - [`FileMountedProvider`] - no issuance at all, read pre-provisioned files
//!
//! The CSR-submitting variants talk to their back-end through the
//! [`CsrSigner`] trait, which hides the actual transport (Kubernetes
//! `CertificateSigningRequest` objects, an RA's gRPC surface) behind a single
//! sign call. The private key never crosses that boundary: providers generate
//! the key pair locally and only the CSR travels.
//!
//! # Example
//!
//! ```text
//! let provider = CertProvider::SelfSigned(SelfSignedProvider::new(ca));
//! let bundle = provider.issue(&names, ttl, false).await?;
//! ```

pub mod external_ra;
pub mod file;
pub mod kubernetes;
pub mod self_signed;

pub use external_ra::{ExternalRaProvider, RootSourcePolicy};
pub use file::FileMountedProvider;
pub use kubernetes::KubernetesCsrProvider;
pub use self_signed::{CaSource, SelfSignedProvider};

use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    string::Ia5String, CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SanType,
};
use zeroize::Zeroizing;

use crate::bundle::KeyCertBundle;
use crate::error::Error;
use crate::Result;

/// A certificate signing request handed to a [`CsrSigner`]
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// PEM-encoded CSR
    pub csr_pem: String,
    /// Signer to route the request to, where the back-end distinguishes them
    pub signer_name: Option<String>,
    /// Requested certificate lifetime
    pub ttl: Duration,
    /// Whether the certificate needs CA basic constraints
    pub for_ca: bool,
}

/// A signed certificate chain returned by a [`CsrSigner`]
#[derive(Debug, Clone)]
pub struct SignedCertChain {
    /// Leaf-first PEM chain as returned by the back-end
    pub cert_chain_pem: Vec<u8>,
    /// Trust root, when the back-end includes one in its response
    pub root_pem: Option<Vec<u8>>,
}

/// Transport seam for CSR-based signing back-ends
///
/// Implementations submit the CSR to their back-end, wait for approval, and
/// return the issued chain. They must not require the private key; the
/// request carries only public material. Back-end timeouts and rejections
/// surface as [`Error::CertGen`](crate::Error::CertGen).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CsrSigner: Send + Sync {
    /// Submit a CSR and wait for the signed chain
    async fn sign(&self, request: SignRequest) -> Result<SignedCertChain>;
}

/// A freshly generated key pair with its CSR
pub(crate) struct GeneratedCsr {
    /// Private key in PEM format; never leaves the process
    pub key_pem: Zeroizing<String>,
    /// PEM-encoded CSR for submission
    pub csr_pem: String,
}

/// Generate a key pair and a CSR carrying `names` as SANs
pub(crate) fn generate_csr(names: &[String]) -> Result<GeneratedCsr> {
    let key_pair = KeyPair::generate()
        .map_err(|e| Error::cert_gen(format!("failed to generate key pair: {}", e)))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    let common_name = names
        .first()
        .map(String::as_str)
        .unwrap_or("filament-identity");
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("Filament".to_string()),
    );
    params.distinguished_name = dn;

    params.subject_alt_names = names
        .iter()
        .map(|san| {
            if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                Ok(SanType::IpAddress(ip))
            } else {
                Ia5String::try_from(san.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| Error::cert_gen(format!("invalid DNS name '{}': {}", san, e)))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| Error::cert_gen(format!("failed to build CSR: {}", e)))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| Error::cert_gen(format!("failed to encode CSR: {}", e)))?;

    Ok(GeneratedCsr {
        key_pem: Zeroizing::new(key_pair.serialize_pem()),
        csr_pem,
    })
}

/// Certificate provider, dispatching to the configured back-end
///
/// Deployments pick exactly one variant at startup; rotation and watching
/// code hold a `CertProvider` and stay agnostic of the issuance mechanism.
pub enum CertProvider {
    /// Local issuance from a mesh-managed CA
    SelfSigned(SelfSignedProvider),
    /// CSR submission to a cluster-level signer
    KubernetesCsr(KubernetesCsrProvider),
    /// CSR submission to an external registration authority
    ExternalRa(ExternalRaProvider),
    /// Pre-issued certificates mounted on disk
    FileMounted(FileMountedProvider),
}

impl CertProvider {
    /// Issue a fresh, verified [`KeyCertBundle`] for `names`
    ///
    /// The file-mounted variant has no issuance step; it re-reads its files
    /// and ignores the requested names and lifetime.
    pub async fn issue(
        &self,
        names: &[String],
        ttl: Duration,
        for_ca: bool,
    ) -> Result<KeyCertBundle> {
        match self {
            CertProvider::SelfSigned(p) => p.issue(names, ttl, for_ca).await,
            CertProvider::KubernetesCsr(p) => p.issue(names, ttl, for_ca).await,
            CertProvider::ExternalRa(p) => p.issue(names, ttl, for_ca).await,
            CertProvider::FileMounted(p) => p.issue().await,
        }
    }

    /// The trust root this provider's certificates chain to, as of now
    ///
    /// Root polling compares this against the published bundle's root to
    /// detect CA rotation between certificate renewals.
    pub async fn current_root(&self) -> Result<Vec<u8>> {
        match self {
            CertProvider::SelfSigned(p) => p.current_root().await,
            CertProvider::KubernetesCsr(p) => p.current_root().await,
            CertProvider::ExternalRa(p) => p.current_root(),
            CertProvider::FileMounted(p) => p.current_root().await,
        }
    }

    /// Short name of the active back-end, for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            CertProvider::SelfSigned(_) => "self-signed",
            CertProvider::KubernetesCsr(_) => "kubernetes-csr",
            CertProvider::ExternalRa(_) => "external-ra",
            CertProvider::FileMounted(_) => "file-mounted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use std::sync::Arc;

    const YEAR: Duration = Duration::from_secs(3600 * 24 * 365);

    #[test]
    fn generated_csr_carries_the_requested_key() {
        let csr = generate_csr(&["workload.filament-system.svc".to_string()])
            .expect("CSR generation should succeed");
        assert!(csr.csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(csr.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn generated_csr_accepts_ip_and_dns_names() {
        let names = vec![
            "workload.filament-system.svc".to_string(),
            "10.0.0.7".to_string(),
        ];
        assert!(generate_csr(&names).is_ok());
    }

    #[tokio::test]
    async fn dispatch_reaches_the_self_signed_backend() {
        let ca = Arc::new(CertificateAuthority::new("Dispatch CA", YEAR).expect("CA creation"));
        let provider =
            CertProvider::SelfSigned(SelfSignedProvider::new(CaSource::Static(Arc::clone(&ca))));

        assert_eq!(provider.kind(), "self-signed");

        let bundle = provider
            .issue(
                &["workload.filament-system.svc".to_string()],
                Duration::from_secs(3600),
                false,
            )
            .await
            .expect("issuance should succeed");
        assert_eq!(bundle.root_pem(), ca.ca_cert_pem().as_bytes());

        let root = provider.current_root().await.expect("current root");
        assert_eq!(root, ca.ca_cert_pem().as_bytes());
    }
}
