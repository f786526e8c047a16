//! Filament identity plane - certificate bundle watching and rotation
//!
//! Filament keeps a process's mTLS identity fresh: it holds the active
//! {private key, leaf certificate, trust root} bundle, re-issues it before
//! expiry, notices root-of-trust changes, and atomically publishes every new
//! bundle to its consumers (TLS listeners, proxies) without dropping
//! in-flight connections.
//!
//! # Architecture
//!
//! One [`watcher::BundleWatcher`] per process owns the current bundle; a
//! [`rotation::Rotator`] drives one of four [`provider::CertProvider`]
//! back-ends (local CA, cluster signer, external RA, mounted files) through
//! independently cancelable loops:
//! - a validity timer that renews at a grace-period fraction of the lifetime
//! - a poll that byte-compares the provider's trust root for rotation
//! - a debounced file watch for mounted identities
//!
//! # Modules
//!
//! - [`bundle`] - immutable, verified key/cert/root snapshots
//! - [`ca`] - signing authority and its file-backed reload slot
//! - [`provider`] - certificate provider back-ends
//! - [`watcher`] - concurrency-safe bundle slot with change notification
//! - [`rotation`] - renewal timing, root polling, file-watch debounce
//! - [`trust`] - trust anchor aggregation across root sources
//! - [`meshconfig`] - signer-to-root mapping from mesh configuration
//! - [`pki`] - X.509 parsing, chain validation, rotation math
//! - [`error`] - error types for the identity plane

#![deny(missing_docs)]

pub mod bundle;
pub mod ca;
pub mod error;
pub mod meshconfig;
pub mod pki;
pub mod provider;
pub mod rotation;
pub mod trust;
pub mod watcher;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the default timing values used throughout Filament.
// Centralizing them here keeps rotation configs, CA construction, and test
// fixtures consistent.

/// Default fraction of a certificate's validity window after which it rotates
///
/// 0.5 renews at the midpoint: half a lifetime of headroom for the back-end
/// to be down before the certificate actually expires.
pub const DEFAULT_GRACE_PERIOD_RATIO: f64 = 0.5;

/// Default requested lifetime for workload certificates
pub const DEFAULT_CERT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default minimum wait before retrying a failed issuance
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Default interval between trust root change checks
pub const DEFAULT_ROOT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default quiet window for coalescing file-change events into one reload
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default clock-skew tolerance backdating issued certificates' NotBefore
pub const DEFAULT_CA_BACKDATE: Duration = Duration::from_secs(5 * 60);
