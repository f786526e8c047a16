//! Signer trust roots distributed through mesh configuration
//!
//! External and cluster-level signers do not always return their trust root
//! alongside a signed chain. The mesh configuration carries a list of
//! [`CertificateData`] entries mapping signer names to root certificates;
//! [`MeshConfigSource`] holds the live view of that list and answers
//! per-signer lookups.
//!
//! One root certificate may vouch for several signers. Internally each entry
//! is keyed by its comma-joined signer list and a lookup matches any element
//! of that list, so `["signer-a", "signer-b"]` resolves both names to the
//! same root.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// A trust root entry from the mesh configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    /// PEM-encoded root certificate
    #[serde(default)]
    pub pem: String,
    /// Signer names this root vouches for
    #[serde(default)]
    pub cert_signers: Vec<String>,
}

/// Certificate section of the mesh configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshCertificates {
    /// Signer trust roots
    #[serde(default)]
    pub ca_certificates: Vec<CertificateData>,
}

/// Live signer-to-root mapping fed by mesh configuration updates
#[derive(Default)]
pub struct MeshConfigSource {
    /// Comma-joined signer list -> root certificate PEM
    entries: RwLock<HashMap<String, String>>,
}

impl MeshConfigSource {
    /// Create an empty source; lookups fail until the first update
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from a YAML `caCertificates` document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let certs: MeshCertificates = serde_yaml::from_str(yaml)
            .map_err(|e| Error::parse(format!("failed to parse mesh certificates: {}", e)))?;
        let source = Self::new();
        source.set_ca_certificates(&certs.ca_certificates);
        Ok(source)
    }

    /// Merge the entries from a mesh config push into the mapping
    ///
    /// Each entry replaces the root recorded for its exact signer list;
    /// signers known from earlier pushes but absent from this one keep
    /// their roots. Entries without signer names describe plain trust
    /// anchors rather than signer roots and are skipped, as are entries
    /// with an empty PEM.
    pub fn set_ca_certificates(&self, certs: &[CertificateData]) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for cert in certs {
            if cert.cert_signers.is_empty() || cert.pem.is_empty() {
                continue;
            }
            entries.insert(cert.cert_signers.join(","), cert.pem.clone());
        }
        debug!(entries = entries.len(), "merged signer trust roots from mesh config");
    }

    /// The root certificate PEM for `signer_name`
    ///
    /// Matches any element of an entry's signer list. Fails with
    /// [`Error::RootNotFound`] when no entry mentions the signer.
    pub fn root_cert_for_signer(&self, signer_name: &str) -> Result<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for (signers, pem) in entries.iter() {
            if signers.split(',').any(|s| s == signer_name) {
                return Ok(pem.clone().into_bytes());
            }
        }
        Err(Error::RootNotFound(signer_name.to_string()))
    }
}
