//! CSR submission to an external registration authority
//!
//! An external RA signs with key material this process never sees, often
//! through one or more intermediates. That leaves two open questions local
//! issuance never has: which intermediates belong in the served chain, and
//! which certificate is the trust root. The provider appends a configured
//! intermediate chain to each response, resolves the root per
//! [`RootSourcePolicy`], and refuses to publish any bundle whose chain does
//! not terminate at the resolved root.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bundle::KeyCertBundle;
use crate::meshconfig::MeshConfigSource;
use crate::pki;
use crate::provider::{generate_csr, CsrSigner, SignRequest, SignedCertChain};
use crate::Result;

/// Where to look for the trust root when the RA response omits one
///
/// Both sources are consulted; the policy only decides which one wins when
/// they disagree and which error surfaces when both fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootSourcePolicy {
    /// Trust the mesh configuration first, fall back to the returned chain
    #[default]
    PreferMeshConfig,
    /// Trust the returned chain first, fall back to the mesh configuration
    PreferCertChain,
}

/// Provider that routes CSRs to an external registration authority
pub struct ExternalRaProvider {
    backend: Arc<dyn CsrSigner>,
    signer_name: String,
    mesh_config: Arc<MeshConfigSource>,
    /// Intermediates appended to every response, when the RA serves bare leaves
    intermediate_chain_pem: Option<Vec<u8>>,
    policy: RootSourcePolicy,
}

impl ExternalRaProvider {
    /// Create a provider submitting to `backend` under `signer_name`
    pub fn new(
        backend: Arc<dyn CsrSigner>,
        signer_name: impl Into<String>,
        mesh_config: Arc<MeshConfigSource>,
    ) -> Self {
        Self {
            backend,
            signer_name: signer_name.into(),
            mesh_config,
            intermediate_chain_pem: None,
            policy: RootSourcePolicy::default(),
        }
    }

    /// Append this PEM chain to every signed response
    pub fn with_intermediate_chain(mut self, pem: Vec<u8>) -> Self {
        self.intermediate_chain_pem = Some(pem);
        self
    }

    /// Choose how the trust root is resolved
    pub fn with_root_source_policy(mut self, policy: RootSourcePolicy) -> Self {
        self.policy = policy;
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
            .backend
            .sign(SignRequest {
                csr_pem: csr.csr_pem,
                signer_name: Some(self.signer_name.clone()),
                ttl,
                for_ca,
            })
            .await?;

        let mut chain_pem = response.cert_chain_pem.clone();
        if let Some(extra) = &self.intermediate_chain_pem {
            if !chain_pem.ends_with(b"\n") {
                chain_pem.push(b'\n');
            }
            chain_pem.extend_from_slice(extra);
        }

        let root = self.resolve_root(&response, &chain_pem)?;
        pki::root_terminates_chain(&chain_pem, &root)?;

        KeyCertBundle::new(chain_pem, csr.key_pem.as_bytes().to_vec(), Vec::new(), root)
    }

    /// Resolve the trust root for a signed response
    ///
    /// A root included in the response always wins; the policy only governs
    /// the mesh-config versus chain-extraction order after that.
    fn resolve_root(&self, response: &SignedCertChain, chain_pem: &[u8]) -> Result<Vec<u8>> {
        if let Some(root) = &response.root_pem {
            return Ok(root.clone());
        }

        match self.policy {
            RootSourcePolicy::PreferMeshConfig => {
                match self.mesh_config.root_cert_for_signer(&self.signer_name) {
                    Ok(root) => Ok(root),
                    Err(mesh_err) => match pki::find_root_in_chain(chain_pem) {
                        Ok(root) => {
                            debug!(
                                signer = %self.signer_name,
                                "no mesh config root for signer, using chain root"
                            );
                            Ok(root)
                        }
                        Err(_) => Err(mesh_err),
                    },
                }
            }
            RootSourcePolicy::PreferCertChain => match pki::find_root_in_chain(chain_pem) {
                Ok(root) => Ok(root),
                Err(chain_err) => {
                    match self.mesh_config.root_cert_for_signer(&self.signer_name) {
                        Ok(root) => {
                            debug!(
                                signer = %self.signer_name,
                                "returned chain carries no root, using mesh config root"
                            );
                            Ok(root)
                        }
                        Err(_) => Err(chain_err),
                    }
                }
            },
        }
    }

    pub(crate) fn current_root(&self) -> Result<Vec<u8>> {
        self.mesh_config.root_cert_for_signer(&self.signer_name)
    }
}
