//! CSR submission to a cluster-level signer
//!
//! The provider generates a key pair locally, submits the CSR through its
//! [`CsrSigner`], and assembles the returned chain into a verified bundle.
//! Cluster signers routinely omit the trust root from their responses, so
//! the root is resolved out of band: from the mesh configuration when a
//! named signer is in play, otherwise from the cluster CA file mounted into
//! every pod.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bundle::KeyCertBundle;
use crate::error::Error;
use crate::meshconfig::MeshConfigSource;
use crate::provider::{generate_csr, CsrSigner, SignRequest};
use crate::Result;

/// Cluster CA bundle mounted into every pod by the kubelet
pub const DEFAULT_CA_CERT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Provider that routes CSRs to a cluster-level signer
pub struct KubernetesCsrProvider {
    signer: Arc<dyn CsrSigner>,
    /// Custom signer to request, `None` for the cluster default
    signer_name: Option<String>,
    mesh_config: Arc<MeshConfigSource>,
    ca_cert_path: PathBuf,
}

impl KubernetesCsrProvider {
    /// Create a provider submitting through `signer`
    ///
    /// With a `signer_name` the trust root comes from the mesh
    /// configuration; without one it is read from the mounted cluster CA
    /// file.
    pub fn new(
        signer: Arc<dyn CsrSigner>,
        signer_name: Option<String>,
        mesh_config: Arc<MeshConfigSource>,
    ) -> Self {
        Self {
            signer,
            signer_name,
            mesh_config,
            ca_cert_path: PathBuf::from(DEFAULT_CA_CERT_PATH),
        }
    }

    /// Override the cluster CA file location
    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = path.into();
        self
    }

    pub(crate) async fn issue(
        &self,
        names: &[String],
        ttl: Duration,
        for_ca: bool,
    ) -> Result<KeyCertBundle> {
        let csr = generate_csr(names)?;
        let response = self
            .signer
            .sign(SignRequest {
                csr_pem: csr.csr_pem,
                signer_name: self.signer_name.clone(),
                ttl,
                for_ca,
            })
            .await?;

        let root = match response.root_pem {
            Some(root) => root,
            None => self.current_root().await?,
        };

        KeyCertBundle::new(
            response.cert_chain_pem,
            csr.key_pem.as_bytes().to_vec(),
            Vec::new(),
            root,
        )
    }

    pub(crate) async fn current_root(&self) -> Result<Vec<u8>> {
        match &self.signer_name {
            Some(name) => self.mesh_config.root_cert_for_signer(name),
            None => tokio::fs::read(&self.ca_cert_path)
                .await
                .map_err(|e| Error::io(&self.ca_cert_path, e)),
        }
    }
}
