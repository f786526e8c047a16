//! Error types for the Filament identity plane

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for identity-plane operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// CA material failed to load or parse at startup
    #[error("CA initialization failed: {0}")]
    CaInit(String),

    /// Issuance was requested before the signing CA became available
    #[error("CA unavailable: {0}")]
    CaUnavailable(String),

    /// Private key does not correspond to the certificate's public key
    #[error("key does not match certificate: {0}")]
    KeyMismatch(String),

    /// Certificate chain does not validate against the bundled trust root
    #[error("certificate chain invalid: {0}")]
    ChainInvalid(String),

    /// Resolved trust root does not terminate the certificate chain
    #[error("root certificate verification failed: {0}")]
    RootVerify(String),

    /// Signing backend failure (timeout, rejection, transport error)
    #[error("certificate generation failed: {0}")]
    CertGen(String),

    /// File read failure during load or reload
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No mesh-config CA certificate entry lists the requested signer
    #[error("no root certificate for signer {0:?} in mesh config")]
    RootNotFound(String),

    /// Trust-anchor propagation to downstream consumers failed
    #[error("trust anchor propagation failed: {0}")]
    Propagation(String),

    /// PEM or X.509 parsing failure
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Create a CA initialization error with the given message
    pub fn ca_init(msg: impl Into<String>) -> Self {
        Self::CaInit(msg.into())
    }

    /// Create a CA unavailable error with the given message
    pub fn ca_unavailable(msg: impl Into<String>) -> Self {
        Self::CaUnavailable(msg.into())
    }

    /// Create a key mismatch error with the given message
    pub fn key_mismatch(msg: impl Into<String>) -> Self {
        Self::KeyMismatch(msg.into())
    }

    /// Create a chain validation error with the given message
    pub fn chain_invalid(msg: impl Into<String>) -> Self {
        Self::ChainInvalid(msg.into())
    }

    /// Create a root verification error with the given message
    pub fn root_verify(msg: impl Into<String>) -> Self {
        Self::RootVerify(msg.into())
    }

    /// Create a certificate generation error with the given message
    pub fn cert_gen(msg: impl Into<String>) -> Self {
        Self::CertGen(msg.into())
    }

    /// Create an I/O error for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a propagation error with the given message
    pub fn propagation(msg: impl Into<String>) -> Self {
        Self::Propagation(msg.into())
    }

    /// Create a parse error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
