//! Crate-wide error type.

use std::io;
use thiserror::Error;

/// Result type used throughout fastzip.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while packing, unpacking, or signing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid ZIP format: {0}")]
    InvalidFormat(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("compression failed for entry {0}")]
    CompressionFailed(String),

    #[error("keystore not found: {0}")]
    KeystoreNotFound(String),

    #[error("keystore key decryption failed, wrong password?")]
    KeyDecryptionFailed,

    #[error("could not extract certificate metadata: {0}")]
    CertMetaExtractionFailed(String),

    #[error("RSA signing failed: {0}")]
    RsaSignFailed(String),

    #[error("malformed ASN.1 structure: {0}")]
    Asn1(String),

    #[error("invalid command line usage: {0}")]
    Usage(String),
}
