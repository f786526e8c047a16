//! Concurrency-safe slot for the process's active identity
//!
//! [`BundleWatcher`] owns the current [`KeyCertBundle`] for the process.
//! Everything else — TLS listeners, rotation loops, trust propagation —
//! borrows it for a single operation via [`BundleWatcher::get`] and must not
//! cache it longer than that.
//!
//! Publishing swaps the whole bundle behind a read-write lock, so readers
//! always see a complete generation, then fires the registered callbacks
//! synchronously in registration order. The slot starts empty and, once
//! populated, never empties again.
//!
//! Callbacks may read the watcher (including [`BundleWatcher::get`], which
//! already observes the new bundle) and may subscribe or unsubscribe, but
//! must not publish: publishing is serialized, and a publish from inside a
//! callback would deadlock on its own dispatch.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::bundle::KeyCertBundle;
use crate::Result;

/// Handle returned by [`BundleWatcher::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Arc<KeyCertBundle>) + Send + Sync>;

/// Holder of the current certificate bundle with change notification
#[derive(Default)]
pub struct BundleWatcher {
    bundle: RwLock<Option<Arc<KeyCertBundle>>>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
    /// Serializes swap-plus-notify so concurrent publishers cannot interleave
    publish_lock: Mutex<()>,
}

impl BundleWatcher {
    /// Create an empty watcher; [`BundleWatcher::get`] returns `None` until
    /// the first publish
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published bundle; never blocks on publishers
    pub fn get(&self) -> Option<Arc<KeyCertBundle>> {
        self.bundle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a callback fired on every publish, in registration order
    ///
    /// Process-lifetime subscribers can drop the returned id; per-connection
    /// subscribers must [`BundleWatcher::unsubscribe`] to avoid leaking.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<KeyCertBundle>) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Validate and publish a bundle assembled from raw PEM material
    ///
    /// Fails without mutating state when the material does not hold
    /// together; subscribers only ever see verified bundles.
    pub fn set_and_notify(
        &self,
        key_pem: Vec<u8>,
        cert_pem: Vec<u8>,
        root_pem: Vec<u8>,
    ) -> Result<()> {
        let bundle = KeyCertBundle::new(cert_pem, key_pem, Vec::new(), root_pem)?;
        self.publish(bundle);
        Ok(())
    }

    /// Read key, cert, and root files and publish the resulting bundle
    ///
    /// Fails without mutating state when a file is unreadable or the
    /// material does not verify.
    pub async fn set_from_files_and_notify(
        &self,
        key_file: &Path,
        cert_file: &Path,
        ca_file: &Path,
    ) -> Result<()> {
        let bundle = KeyCertBundle::from_files(key_file, cert_file, ca_file).await?;
        self.publish(bundle);
        Ok(())
    }

    /// Publish an already-verified bundle
    pub fn publish(&self, bundle: KeyCertBundle) {
        self.replace_and_notify(Arc::new(bundle));
    }

    fn replace_and_notify(&self, bundle: Arc<KeyCertBundle>) {
        let _publish = self
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        {
            let mut slot = self.bundle.write().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(Arc::clone(&bundle));
        }

        // Callbacks run outside the subscriber lock so they may subscribe
        // or unsubscribe without deadlocking
        let callbacks: Vec<Callback> = {
            let subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in &callbacks {
            callback(&bundle);
        }
        debug!(subscribers = callbacks.len(), "published certificate bundle");
    }
}
