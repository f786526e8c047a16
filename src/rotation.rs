//! Certificate rotation engine
//!
//! [`Rotator`] keeps the published bundle's remaining validity above a
//! safety margin. Three independently cancelable loops drive it:
//!
//! - [`Rotator::run`] — the timer path: sleep until the certificate reaches
//!   the grace-period point of its validity window, re-issue, publish.
//! - [`Rotator::run_root_poll`] — the out-of-band path: periodically compare
//!   the provider's current trust root against the published one and force
//!   re-issuance on mismatch, even mid-window.
//! - [`Rotator::run_file_watch`] — for mounted identities: reload from disk
//!   when change events arrive, debounced so a cert and key written as two
//!   events produce one reload.
//!
//! Rotation failure never takes down serving. The timer loop logs, keeps
//! the previous bundle published, and schedules nothing sooner than the
//! configured retry interval after the initial issuance, so neither a
//! failing back-end nor a certificate already past its grace point when
//! issued can turn into a tight issue spin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pki;
use crate::provider::CertProvider;
use crate::trust::{TrustAnchorAggregator, TrustAnchorSource, TrustAnchorUpdate};
use crate::watcher::BundleWatcher;
use crate::{
    Result, DEFAULT_CERT_TTL, DEFAULT_GRACE_PERIOD_RATIO, DEFAULT_RETRY_INTERVAL,
    DEFAULT_ROOT_POLL_INTERVAL, DEFAULT_WATCH_DEBOUNCE,
};

/// Rotation timing and identity configuration
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// DNS names (or IP addresses) requested on every issued certificate
    pub dns_names: Vec<String>,
    /// Requested certificate lifetime
    pub cert_ttl: Duration,
    /// Fraction of the validity window after which renewal fires
    pub grace_period_ratio: f64,
    /// Whether issued certificates need CA basic constraints
    pub for_ca: bool,
    /// Minimum wait between rotation attempts after the initial issuance
    pub retry_interval: Duration,
    /// How often the provider root is compared against the published one
    pub root_poll_interval: Duration,
    /// Quiet window coalescing bursts of file-change events
    pub watch_debounce: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            dns_names: Vec::new(),
            cert_ttl: DEFAULT_CERT_TTL,
            grace_period_ratio: DEFAULT_GRACE_PERIOD_RATIO,
            for_ca: false,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            root_poll_interval: DEFAULT_ROOT_POLL_INTERVAL,
            watch_debounce: DEFAULT_WATCH_DEBOUNCE,
        }
    }
}

/// File locations of a mounted identity
#[derive(Debug, Clone)]
pub struct WatchedPaths {
    /// Private key file
    pub key_path: PathBuf,
    /// Certificate file
    pub cert_path: PathBuf,
    /// Trust root file; re-read on each reload rather than watched
    pub ca_path: PathBuf,
}

/// A change notification for one watched path
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Path the filesystem reported as changed
    pub path: PathBuf,
}

/// Driver that keeps a [`BundleWatcher`] stocked with fresh certificates
pub struct Rotator {
    provider: CertProvider,
    watcher: Arc<BundleWatcher>,
    trust: Option<Arc<TrustAnchorAggregator>>,
    config: RotationConfig,
}

impl Rotator {
    /// Create a rotator publishing through `watcher`
    ///
    /// A grace period ratio outside `(0, 1]` cannot schedule sensibly and
    /// falls back to the default.
    pub fn new(provider: CertProvider, watcher: Arc<BundleWatcher>, config: RotationConfig) -> Self {
        let mut config = config;
        if config.grace_period_ratio <= 0.0 || config.grace_period_ratio > 1.0 {
            warn!(
                ratio = config.grace_period_ratio,
                "grace period ratio out of range, using default"
            );
            config.grace_period_ratio = DEFAULT_GRACE_PERIOD_RATIO;
        }
        Self {
            provider,
            watcher,
            trust: None,
            config,
        }
    }

    /// Feed each rotation's trust root into an aggregator
    pub fn with_trust_aggregator(mut self, trust: Arc<TrustAnchorAggregator>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Issue a fresh bundle from the provider and publish it
    ///
    /// On success the bundle's trust root is also contributed to the
    /// attached aggregator; anchor propagation failure is logged but does
    /// not fail the rotation, the certificate is already live.
    pub async fn rotate_once(&self) -> Result<()> {
        let bundle = self
            .provider
            .issue(&self.config.dns_names, self.config.cert_ttl, self.config.for_ca)
            .await?;
        let info = bundle.certificate_info()?;
        let root_pem = bundle.root_pem().to_vec();

        self.watcher.publish(bundle);
        info!(
            provider = self.provider.kind(),
            serial = %info.serial,
            not_after = info.not_after,
            "rotated certificate bundle"
        );

        if let Some(trust) = &self.trust {
            let update = TrustAnchorUpdate {
                source: self.trust_source(),
                certs: vec![String::from_utf8_lossy(&root_pem).into_owned()],
            };
            if let Err(e) = trust.update(update).await {
                warn!(error = %e, "trust anchor update failed after rotation");
            }
        }
        Ok(())
    }

    /// Re-issue if the provider's root differs from the published one
    ///
    /// Returns whether a rotation happened. With nothing published there is
    /// nothing to compare; the timer path owns the first issuance.
    pub async fn rotate_if_root_changed(&self) -> Result<bool> {
        let Some(bundle) = self.watcher.get() else {
            return Ok(false);
        };
        let current = self.provider.current_root().await?;
        if current == bundle.root_pem() {
            return Ok(false);
        }

        info!(
            provider = self.provider.kind(),
            "trust root changed, rotating certificate bundle"
        );
        self.rotate_once().await?;
        Ok(true)
    }

    /// Drive timer-based rotation until `stop` fires
    ///
    /// An empty watcher rotates immediately, so this also performs the
    /// initial issuance. After that first pass every wait is floored at the
    /// retry interval: a failed issuance retries no sooner, and a
    /// certificate already past its grace point the moment it is issued
    /// (short lifetime against a large backdate) re-issues on the floor
    /// cadence instead of spinning against the back-end. Failures log and
    /// retry; they never propagate.
    pub async fn run(&self, stop: CancellationToken) {
        let mut first_pass = true;
        loop {
            let mut wait = self.next_wait();
            if !first_pass {
                wait = wait.max(self.config.retry_interval);
            }
            first_pass = false;
            debug!(wait_secs = wait.as_secs(), "next certificate rotation scheduled");

            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("rotation loop stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.rotate_once().await {
                error!(
                    error = %e,
                    provider = self.provider.kind(),
                    "certificate rotation failed"
                );
            }
        }
    }

    /// Poll for out-of-band trust root changes until `stop` fires
    ///
    /// Polling rather than watching is deliberate: the root rarely changes
    /// and a byte compare per tick is cheap.
    pub async fn run_root_poll(&self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.root_poll_interval);
        interval.tick().await; // First tick fires immediately; the timer path covers startup
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("root poll loop stopped");
                    return;
                }
                _ = interval.tick() => {}
            }
            match self.rotate_if_root_changed().await {
                Ok(true) => info!("certificate bundle rotated for new trust root"),
                Ok(false) => debug!("trust root unchanged"),
                Err(e) => warn!(error = %e, "root change check failed"),
            }
        }
    }

    /// Reload a mounted identity on file changes until `stop` fires
    ///
    /// `cert_events` and `key_events` deliver raw change notifications for
    /// their paths. Events arriving within the debounce window collapse
    /// into a single reload. The initial load must succeed; afterwards a
    /// failed reload keeps the published bundle and waits for the next
    /// event. Returns when both event sources close.
    pub async fn run_file_watch(
        &self,
        paths: WatchedPaths,
        mut cert_events: mpsc::Receiver<FileEvent>,
        mut key_events: mpsc::Receiver<FileEvent>,
        stop: CancellationToken,
    ) -> Result<()> {
        self.watcher
            .set_from_files_and_notify(&paths.key_path, &paths.cert_path, &paths.ca_path)
            .await?;

        let mut reload_at: Option<Instant> = None;
        let mut cert_open = true;
        let mut key_open = true;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("file watch loop stopped");
                    return Ok(());
                }
                event = cert_events.recv(), if cert_open => {
                    match event {
                        Some(event) => {
                            debug!(path = %event.path.display(), "certificate file changed");
                            reload_at.get_or_insert_with(|| Instant::now() + self.config.watch_debounce);
                        }
                        None => cert_open = false,
                    }
                }
                event = key_events.recv(), if key_open => {
                    match event {
                        Some(event) => {
                            debug!(path = %event.path.display(), "key file changed");
                            reload_at.get_or_insert_with(|| Instant::now() + self.config.watch_debounce);
                        }
                        None => key_open = false,
                    }
                }
                _ = tokio::time::sleep_until(reload_at.unwrap_or_else(Instant::now)), if reload_at.is_some() => {
                    reload_at = None;
                    match self
                        .watcher
                        .set_from_files_and_notify(&paths.key_path, &paths.cert_path, &paths.ca_path)
                        .await
                    {
                        Ok(()) => info!("reloaded certificate bundle after file change"),
                        Err(e) => warn!(error = %e, "failed to reload certificate bundle after file change"),
                    }
                }
            }

            if !cert_open && !key_open && reload_at.is_none() {
                debug!("file change event sources closed");
                return Ok(());
            }
        }
    }

    /// Time until the published certificate reaches its rotation point
    ///
    /// With nothing published the wait is zero: the first pass issues
    /// immediately.
    fn next_wait(&self) -> Duration {
        match self.watcher.get() {
            Some(bundle) => match bundle.certificate_info() {
                Ok(info) => info.rotation_wait(self.config.grace_period_ratio, pki::unix_now()),
                Err(e) => {
                    warn!(error = %e, "published certificate unreadable, rotating now");
                    Duration::ZERO
                }
            },
            None => Duration::ZERO,
        }
    }

    fn trust_source(&self) -> TrustAnchorSource {
        match &self.provider {
            CertProvider::SelfSigned(_) => TrustAnchorSource::SelfManagedCa,
            CertProvider::KubernetesCsr(_) => TrustAnchorSource::Kubernetes,
            CertProvider::ExternalRa(_) => TrustAnchorSource::ExternalRa,
            CertProvider::FileMounted(_) => TrustAnchorSource::FileMounted,
        }
    }
}
