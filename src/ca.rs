//! Signing authority and its file-backed reload slot
//!
//! [`CertificateAuthority`] wraps CA key material and issues leaf or
//! subordinate-CA certificates. The raw PEM bytes are the single source of
//! truth: the rcgen signer is rebuilt from them on every signing operation,
//! so the bytes and the signer can never drift apart.
//!
//! [`FileBackedCa`] keeps an authority loaded from a cert/key file pair and
//! refreshes it lazily. Every access byte-compares the on-disk material with
//! the loaded snapshot and rebuilds only on change — a rotated CA secret is
//! picked up without any restart or watch machinery. At most one reload runs
//! at a time; concurrent callers see the old snapshot until the new one is
//! in place, never a torn value.
//!
//! Issued certificates have their NotBefore backdated by a configurable
//! clock-skew tolerance (default five minutes) so freshly minted identities
//! are immediately valid on peers with slightly lagging clocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use tokio::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use crate::bundle::KeyCertBundle;
use crate::error::Error;
use crate::pki::CertificateInfo;
use crate::{Result, DEFAULT_CA_BACKDATE};

/// Certificate authority backed by in-memory PEM material
pub struct CertificateAuthority {
    /// PEM-encoded CA certificate for distribution
    ca_cert_pem: String,
    /// CA key pair serialized as PEM (deserialized per signing; KeyPair is not Clone)
    ca_key_pem: Zeroizing<String>,
    /// Clock-skew tolerance subtracted from NotBefore on issued certs
    backdate: Duration,
}

impl CertificateAuthority {
    /// Create a new self-signed CA valid for `validity` from now
    pub fn new(common_name: &str, validity: Duration) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("Filament".to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ::time::Duration::seconds(validity.as_secs() as i64);

        let key_pair = KeyPair::generate()
            .map_err(|e| Error::cert_gen(format!("failed to generate CA key: {}", e)))?;
        let ca_key_pem = Zeroizing::new(key_pair.serialize_pem());

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::cert_gen(format!("failed to create CA certificate: {}", e)))?;

        Ok(Self {
            ca_cert_pem: cert.pem(),
            ca_key_pem,
            backdate: DEFAULT_CA_BACKDATE,
        })
    }

    /// Load a CA from PEM-encoded certificate and key material
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        // Both halves must parse before we accept them
        let _ = KeyPair::from_pem(key_pem)
            .map_err(|e| Error::parse(format!("failed to parse CA key: {}", e)))?;
        let _ = CertificateInfo::from_pem(cert_pem.as_bytes())?;

        Ok(Self {
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: Zeroizing::new(key_pem.to_string()),
            backdate: DEFAULT_CA_BACKDATE,
        })
    }

    /// Set the clock-skew tolerance applied to issued certificates
    pub fn with_backdate(mut self, backdate: Duration) -> Self {
        self.backdate = backdate;
        self
    }

    /// The CA certificate in PEM format (the trust root for issued certs)
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// The CA private key in PEM format (for persistence)
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Identity and validity details of the CA certificate
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(self.ca_cert_pem.as_bytes())
    }

    /// Load the key pair from the stored PEM
    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| Error::parse(format!("failed to load CA key: {}", e)))
    }

    /// Populate issuance parameters shared by local issuance and CSR signing
    fn apply_issuance_params(
        &self,
        params: &mut CertificateParams,
        names: &[String],
        ttl: Duration,
        for_ca: bool,
    ) -> Result<()> {
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

        if for_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
            params.extended_key_usages = Vec::new();
        } else {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            // Mesh identities serve and dial with the same certificate
            params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
        }

        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now - ::time::Duration::seconds(self.backdate.as_secs() as i64);
        params.not_after = now + ::time::Duration::seconds(ttl.as_secs() as i64);

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
        Ok(())
    }

    /// Generate a fresh key pair and issue a certificate for `names`
    ///
    /// Returns a verified [`KeyCertBundle`] whose trust root is this CA's
    /// certificate. With `for_ca` the issued certificate carries CA basic
    /// constraints and can act as a subordinate authority.
    pub fn issue_key_cert(
        &self,
        names: &[String],
        ttl: Duration,
        for_ca: bool,
    ) -> Result<KeyCertBundle> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::cert_gen(format!("failed to generate key pair: {}", e)))?;

        let mut params = CertificateParams::default();
        self.apply_issuance_params(&mut params, names, ttl, for_ca)?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| Error::parse(format!("failed to create issuer: {}", e)))?;
        let cert = params
            .signed_by(&key_pair, &issuer)
            .map_err(|e| Error::cert_gen(format!("failed to sign certificate: {}", e)))?;

        KeyCertBundle::new(
            cert.pem().into_bytes(),
            key_pair.serialize_pem().into_bytes(),
            Vec::new(),
            self.ca_cert_pem.clone().into_bytes(),
        )
    }

    /// Sign a PEM CSR, overriding subject, validity, SANs, and usages
    ///
    /// The requester's public key is taken from the CSR; everything else is
    /// dictated by this CA. Returns the signed certificate in PEM format.
    pub fn sign_csr(
        &self,
        csr_pem: &str,
        names: &[String],
        ttl: Duration,
        for_ca: bool,
    ) -> Result<String> {
        let mut csr_params = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| Error::parse(format!("failed to parse CSR: {}", e)))?;

        self.apply_issuance_params(&mut csr_params.params, names, ttl, for_ca)?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| Error::parse(format!("failed to create issuer: {}", e)))?;
        let signed = csr_params
            .signed_by(&issuer)
            .map_err(|e| Error::cert_gen(format!("failed to sign CSR: {}", e)))?;

        Ok(signed.pem())
    }
}

/// Snapshot of the CA as last loaded from disk
struct CaSnapshot {
    cert_bytes: Vec<u8>,
    key_bytes: Zeroizing<Vec<u8>>,
    authority: Arc<CertificateAuthority>,
}

impl CaSnapshot {
    fn matches(&self, cert_bytes: &[u8], key_bytes: &[u8]) -> bool {
        self.cert_bytes == cert_bytes && self.key_bytes.as_slice() == key_bytes
    }
}

/// Lazily reloading CA slot backed by a cert/key file pair
///
/// No I/O happens at construction; the first [`FileBackedCa::current`] call
/// performs the initial load. Later calls re-read the files and byte-compare
/// against the held snapshot, rebuilding the authority only when the material
/// actually changed.
pub struct FileBackedCa {
    cert_path: PathBuf,
    key_path: PathBuf,
    backdate: Duration,
    current: RwLock<Option<CaSnapshot>>,
}

impl FileBackedCa {
    /// Create a slot for the given certificate and key paths
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            backdate: DEFAULT_CA_BACKDATE,
            current: RwLock::new(None),
        }
    }

    /// Set the clock-skew tolerance applied by the loaded authority
    pub fn with_backdate(mut self, backdate: Duration) -> Self {
        self.backdate = backdate;
        self
    }

    /// Path of the CA certificate file
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// The current authority, reloading if the on-disk bytes changed
    ///
    /// Fails with [`Error::Io`] when a file cannot be read and with
    /// [`Error::CaInit`] when the material does not parse; the previously
    /// loaded snapshot stays in place for later calls in both cases.
    pub async fn current(&self) -> Result<Arc<CertificateAuthority>> {
        let cert_bytes = tokio::fs::read(&self.cert_path)
            .await
            .map_err(|e| Error::io(&self.cert_path, e))?;
        let key_bytes = tokio::fs::read(&self.key_path)
            .await
            .map_err(|e| Error::io(&self.key_path, e))?;

        {
            let guard = self.current.read().await;
            if let Some(snap) = guard.as_ref() {
                if snap.matches(&cert_bytes, &key_bytes) {
                    return Ok(Arc::clone(&snap.authority));
                }
            }
        }

        let mut guard = self.current.write().await;
        // Another caller may have completed the same reload while we waited
        if let Some(snap) = guard.as_ref() {
            if snap.matches(&cert_bytes, &key_bytes) {
                return Ok(Arc::clone(&snap.authority));
            }
        }

        let first_load = guard.is_none();
        let authority = Arc::new(self.build_authority(&cert_bytes, &key_bytes)?);
        *guard = Some(CaSnapshot {
            cert_bytes,
            key_bytes: Zeroizing::new(key_bytes),
            authority: Arc::clone(&authority),
        });

        if first_load {
            info!(path = %self.cert_path.display(), "loaded signing CA");
        } else {
            info!(path = %self.cert_path.display(), "reloaded signing CA after change on disk");
        }
        Ok(authority)
    }

    /// The current trust root PEM, reloading if the files changed
    pub async fn current_root(&self) -> Result<Vec<u8>> {
        Ok(self.current().await?.ca_cert_pem().as_bytes().to_vec())
    }

    fn build_authority(&self, cert: &[u8], key: &[u8]) -> Result<CertificateAuthority> {
        let cert_str = std::str::from_utf8(cert)
            .map_err(|_| Error::ca_init("CA certificate is not valid UTF-8"))?;
        let key_str =
            std::str::from_utf8(key).map_err(|_| Error::ca_init("CA key is not valid UTF-8"))?;
        let authority = CertificateAuthority::from_pem(cert_str, key_str).map_err(|e| {
            Error::ca_init(format!(
                "failed to load CA from {}: {}",
                self.cert_path.display(),
                e
            ))
        })?;
        Ok(authority.with_backdate(self.backdate))
    }
}
