//! Trust anchor aggregation across root sources
//!
//! During CA migration and in multi-signer meshes more than one root of
//! trust is live at once: the mesh CA's own root, cluster signer roots from
//! mesh configuration, file-mounted anchors. Workloads must trust the union
//! or connections fail midway through the transition.
//!
//! [`TrustAnchorAggregator`] holds one contribution per
//! [`TrustAnchorSource`]. Updates replace that source's prior contribution
//! wholesale; the aggregate is the deduplicated union in a deterministic
//! order (source, then certificate content), so repeated reads and restarts
//! serve byte-identical trust bundles.
//!
//! Aggregated anchors are pushed downstream through an [`AnchorPropagator`].
//! Propagation failure never rolls back the local update: the next
//! propagation attempt carries the accumulated state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Error;
use crate::pki;
use crate::Result;

/// Origin of a trust anchor contribution
///
/// The variant order fixes the aggregate ordering: the mesh's own CA root
/// sorts first, pushed mesh-config roots last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrustAnchorSource {
    /// Root of the mesh-managed CA this process signs with
    SelfManagedCa,
    /// Cluster-level signer roots
    Kubernetes,
    /// External registration authority roots
    ExternalRa,
    /// Anchors mounted on the filesystem
    FileMounted,
    /// Anchors pushed through mesh configuration
    MeshConfig,
}

impl std::fmt::Display for TrustAnchorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrustAnchorSource::SelfManagedCa => "self-managed-ca",
            TrustAnchorSource::Kubernetes => "kubernetes",
            TrustAnchorSource::ExternalRa => "external-ra",
            TrustAnchorSource::FileMounted => "file-mounted",
            TrustAnchorSource::MeshConfig => "mesh-config",
        };
        f.write_str(name)
    }
}

/// A replace-semantics anchor update from one source
#[derive(Debug, Clone)]
pub struct TrustAnchorUpdate {
    /// Which source this contribution belongs to
    pub source: TrustAnchorSource,
    /// The source's complete current set of root certificate PEMs
    pub certs: Vec<String>,
}

/// Downstream delivery seam for the aggregated trust bundle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnchorPropagator: Send + Sync {
    /// Deliver the full aggregate to downstream consumers
    async fn propagate(&self, anchors: &[String]) -> Result<()>;
}

/// Merger of trust anchors from multiple concurrent sources
#[derive(Default)]
pub struct TrustAnchorAggregator {
    anchors: RwLock<BTreeMap<TrustAnchorSource, BTreeSet<String>>>,
    propagator: Option<Arc<dyn AnchorPropagator>>,
}

impl TrustAnchorAggregator {
    /// Create an aggregator that keeps anchors locally without propagation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an aggregator that pushes every aggregate change downstream
    pub fn with_propagator(propagator: Arc<dyn AnchorPropagator>) -> Self {
        Self {
            anchors: RwLock::default(),
            propagator: Some(propagator),
        }
    }

    /// Replace one source's contribution and propagate the new aggregate
    ///
    /// Every entry must parse as PEM certificate material; a malformed entry
    /// rejects the whole update. Propagation failure surfaces as
    /// [`Error::Propagation`] but the local update stays applied.
    pub async fn update(&self, update: TrustAnchorUpdate) -> Result<()> {
        for pem in &update.certs {
            pki::certs_from_pem(pem.as_bytes())?;
        }

        {
            let mut anchors = self.anchors.write().unwrap_or_else(PoisonError::into_inner);
            anchors.insert(update.source, update.certs.iter().cloned().collect());
        }
        debug!(
            source = %update.source,
            certs = update.certs.len(),
            "replaced trust anchor contribution"
        );

        if let Some(propagator) = &self.propagator {
            let aggregate = self.anchors();
            propagator.propagate(&aggregate).await.map_err(|e| {
                Error::propagation(format!("failed to propagate trust anchors: {}", e))
            })?;
        }
        Ok(())
    }

    /// The deduplicated aggregate, ordered by source then content
    pub fn anchors(&self) -> Vec<String> {
        let anchors = self.anchors.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = BTreeSet::new();
        let mut merged = Vec::new();
        for certs in anchors.values() {
            for pem in certs {
                if seen.insert(pem.clone()) {
                    merged.push(pem.clone());
                }
            }
        }
        merged
    }

    /// The aggregate concatenated into a single PEM trust bundle
    pub fn bundle_pem(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for pem in self.anchors() {
            out.extend_from_slice(pem.trim_end().as_bytes());
            out.push(b'\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use std::time::Duration;

    const YEAR: Duration = Duration::from_secs(3600 * 24 * 365);

    fn root_pem(name: &str) -> String {
        CertificateAuthority::new(name, YEAR)
            .expect("CA creation should succeed")
            .ca_cert_pem()
            .to_string()
    }

    fn update(source: TrustAnchorSource, certs: &[&str]) -> TrustAnchorUpdate {
        TrustAnchorUpdate {
            source,
            certs: certs.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn same_source_updates_replace_not_append() {
        let root1 = root_pem("Root One");
        let root2 = root_pem("Root Two");
        let root3 = root_pem("Root Three");

        let aggregator = TrustAnchorAggregator::new();
        aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&root1]))
            .await
            .expect("first update");
        aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&root2]))
            .await
            .expect("replacing update");
        aggregator
            .update(update(TrustAnchorSource::MeshConfig, &[&root3]))
            .await
            .expect("second source update");

        let anchors = aggregator.anchors();
        assert!(!anchors.contains(&root1));
        assert!(anchors.contains(&root2));
        assert!(anchors.contains(&root3));
        assert_eq!(anchors.len(), 2);
    }

    #[tokio::test]
    async fn shared_anchors_appear_once_in_the_aggregate() {
        let shared = root_pem("Shared Root");

        let aggregator = TrustAnchorAggregator::new();
        aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&shared]))
            .await
            .expect("first source");
        aggregator
            .update(update(TrustAnchorSource::MeshConfig, &[&shared]))
            .await
            .expect("second source");

        assert_eq!(aggregator.anchors().len(), 1);
    }

    #[tokio::test]
    async fn aggregate_order_is_deterministic_across_insert_order() {
        let ca_root = root_pem("Mesh CA Root");
        let pushed = root_pem("Pushed Root");

        // Insert in reverse source order; the aggregate still leads with
        // the self-managed CA contribution
        let aggregator = TrustAnchorAggregator::new();
        aggregator
            .update(update(TrustAnchorSource::MeshConfig, &[&pushed]))
            .await
            .expect("mesh config update");
        aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&ca_root]))
            .await
            .expect("self-managed update");

        assert_eq!(aggregator.anchors(), vec![ca_root, pushed]);
    }

    #[tokio::test]
    async fn malformed_entries_reject_the_whole_update() {
        let good = root_pem("Good Root");

        let aggregator = TrustAnchorAggregator::new();
        let result = aggregator
            .update(update(
                TrustAnchorSource::FileMounted,
                &[&good, "this is not PEM"],
            ))
            .await;
        assert!(matches!(result, Err(Error::Parse(_))));
        assert!(aggregator.anchors().is_empty());
    }

    #[tokio::test]
    async fn propagation_failure_keeps_the_local_update() {
        let root = root_pem("Stranded Root");

        let mut propagator = MockAnchorPropagator::new();
        propagator
            .expect_propagate()
            .returning(|_| Err(Error::propagation("downstream unreachable")));

        let aggregator = TrustAnchorAggregator::with_propagator(Arc::new(propagator));
        let result = aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&root]))
            .await;

        assert!(matches!(result, Err(Error::Propagation(_))));
        assert_eq!(aggregator.anchors(), vec![root]);
    }

    #[tokio::test]
    async fn propagator_receives_the_merged_aggregate() {
        let root_a = root_pem("Merged A");
        let root_b = root_pem("Merged B");

        let mut propagator = MockAnchorPropagator::new();
        propagator
            .expect_propagate()
            .withf(|anchors| anchors.len() == 1)
            .times(1)
            .returning(|_| Ok(()));
        propagator
            .expect_propagate()
            .withf(|anchors| anchors.len() == 2)
            .times(1)
            .returning(|_| Ok(()));

        let aggregator = TrustAnchorAggregator::with_propagator(Arc::new(propagator));
        aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&root_a]))
            .await
            .expect("first update");
        aggregator
            .update(update(TrustAnchorSource::Kubernetes, &[&root_b]))
            .await
            .expect("second update");
    }

    #[tokio::test]
    async fn bundle_pem_concatenates_parseable_blocks() {
        let root_a = root_pem("Bundle A");
        let root_b = root_pem("Bundle B");

        let aggregator = TrustAnchorAggregator::new();
        aggregator
            .update(update(TrustAnchorSource::SelfManagedCa, &[&root_a]))
            .await
            .expect("first update");
        aggregator
            .update(update(TrustAnchorSource::FileMounted, &[&root_b]))
            .await
            .expect("second update");

        let bundle = aggregator.bundle_pem();
        let ders = pki::certs_from_pem(&bundle).expect("bundle should parse");
        assert_eq!(ders.len(), 2);
    }
}
