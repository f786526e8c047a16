//! Pre-issued certificates mounted on the filesystem
//!
//! No issuance happens here: some external agent (cert-manager, a secrets
//! operator, an init container) keeps the files fresh, and this provider
//! re-reads them whenever asked. Changes land on the next issue call; pair
//! it with the file-watch trigger for prompt pickup.

use std::path::PathBuf;

use crate::bundle::KeyCertBundle;
use crate::error::Error;
use crate::Result;

/// Provider that reads a pre-provisioned key, certificate, and root
pub struct FileMountedProvider {
    key_path: PathBuf,
    cert_path: PathBuf,
    root_path: PathBuf,
}

impl FileMountedProvider {
    /// Create a provider over the mounted file locations
    pub fn new(
        key_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        root_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key_path: key_path.into(),
            cert_path: cert_path.into(),
            root_path: root_path.into(),
        }
    }

    pub(crate) async fn issue(&self) -> Result<KeyCertBundle> {
        KeyCertBundle::from_files(&self.key_path, &self.cert_path, &self.root_path).await
    }

    pub(crate) async fn current_root(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.root_path)
            .await
            .map_err(|e| Error::io(&self.root_path, e))
    }
}
