//! Local issuance from a mesh-managed CA
//!
//! The simplest deployment shape: this process holds the signing CA itself
//! and issues workload certificates directly, no CSR round-trip. The CA can
//! be a fixed in-memory authority or a [`FileBackedCa`] slot that picks up
//! CA rotation from disk between issuances.

use std::sync::Arc;
use std::time::Duration;

use crate::bundle::KeyCertBundle;
use crate::ca::{CertificateAuthority, FileBackedCa};
use crate::error::Error;
use crate::Result;

/// Where the signing CA comes from
pub enum CaSource {
    /// CA reloaded lazily from a cert/key file pair
    File(Arc<FileBackedCa>),
    /// Fixed in-memory CA
    Static(Arc<CertificateAuthority>),
}

/// Provider that signs locally with a mesh-managed CA
pub struct SelfSignedProvider {
    ca: CaSource,
}

impl SelfSignedProvider {
    /// Create a provider around the given CA source
    pub fn new(ca: CaSource) -> Self {
        Self { ca }
    }

    /// Convenience constructor for a file-backed CA
    pub fn from_files(
        cert_path: impl Into<std::path::PathBuf>,
        key_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::new(CaSource::File(Arc::new(FileBackedCa::new(
            cert_path, key_path,
        ))))
    }

    /// The signing authority, reloading file-backed material if it changed
    ///
    /// Slot failures surface as [`Error::CaUnavailable`]: from the caller's
    /// view the back-end cannot currently serve, whatever the underlying
    /// read or parse problem was.
    async fn authority(&self) -> Result<Arc<CertificateAuthority>> {
        match &self.ca {
            CaSource::File(slot) => slot
                .current()
                .await
                .map_err(|e| Error::ca_unavailable(format!("signing CA unavailable: {}", e))),
            CaSource::Static(authority) => Ok(Arc::clone(authority)),
        }
    }

    pub(crate) async fn issue(
        &self,
        names: &[String],
        ttl: Duration,
        for_ca: bool,
    ) -> Result<KeyCertBundle> {
        self.authority().await?.issue_key_cert(names, ttl, for_ca)
    }

    pub(crate) async fn current_root(&self) -> Result<Vec<u8>> {
        Ok(self.authority().await?.ca_cert_pem().as_bytes().to_vec())
    }
}
