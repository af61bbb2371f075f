//! Certificate extraction from package archives and the signature matcher.
//!
//! Packages embed their signer's certificate chain in a fixed-name PKCS#7
//! entry. Extraction is read-only; the container parsing itself sits behind
//! the [`SignatureParser`] seam so tests can substitute a deterministic
//! parser without crafting real PKCS#7 material.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::{Decode, EncodePem};

use crate::policy::PolicyIndex;

/// Fixed-name signature-block entry inside a package archive.
pub const SIGNATURE_BLOCK_ENTRY: &str = "META-INF/CERT.RSA";

/// Errors from certificate extraction.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    /// Opening or reading the package failed.
    #[error("failed to read package {path}: {source}")]
    Io {
        /// Package path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The package is not a readable zip archive.
    #[error("failed to read archive {path}: {source}")]
    Zip {
        /// Package path.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// The signature block does not decode as PKCS#7 `SignedData`.
    #[error("signature block does not parse: {0}")]
    Parse(#[from] der::Error),
    /// The signature block carries no certificate.
    #[error("signature block carries no certificates")]
    NoCertificates,
}

/// Parses a raw signature block into its leading certificate.
///
/// The production implementation is [`Pkcs7Parser`]; tests substitute a
/// canned one.
pub trait SignatureParser: Send + Sync {
    /// Return the first certificate of the block, serialized as PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Parse`] for undecodable blocks and
    /// [`CertificateError::NoCertificates`] for blocks without certificates.
    fn leading_certificate(&self, block: &[u8]) -> Result<Vec<u8>, CertificateError>;
}

/// PKCS#7 / CMS `SignedData` parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pkcs7Parser;

impl SignatureParser for Pkcs7Parser {
    fn leading_certificate(&self, block: &[u8]) -> Result<Vec<u8>, CertificateError> {
        let content = ContentInfo::from_der(block)?;
        let signed_data = content.content.decode_as::<SignedData>()?;
        let certificates = signed_data
            .certificates
            .ok_or(CertificateError::NoCertificates)?;
        let cert = certificates
            .0
            .iter()
            .find_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert),
                _ => None,
            })
            .ok_or(CertificateError::NoCertificates)?;
        let pem = cert.to_pem(der::pem::LineEnding::LF)?;
        Ok(pem.into_bytes())
    }
}

/// Pull the embedded signing certificate out of a package archive.
///
/// Looks for the fixed [`SIGNATURE_BLOCK_ENTRY`]; an archive without one is
/// `Ok(None)` (an unsigned package, skipped by the pipeline). The archive is
/// never mutated.
///
/// # Errors
///
/// Returns [`CertificateError::Io`]/[`CertificateError::Zip`] for unreadable
/// packages and the parser's errors for undecodable signature blocks.
pub fn extract_certificate(
    package: &Path,
    parser: &dyn SignatureParser,
) -> Result<Option<Vec<u8>>, CertificateError> {
    let file = File::open(package).map_err(|source| CertificateError::Io {
        path: package.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| CertificateError::Zip {
        path: package.to_path_buf(),
        source,
    })?;
    let mut entry = match archive.by_name(SIGNATURE_BLOCK_ENTRY) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(source) => {
            return Err(CertificateError::Zip {
                path: package.to_path_buf(),
                source,
            })
        }
    };
    let mut block = Vec::new();
    entry
        .read_to_end(&mut block)
        .map_err(|source| CertificateError::Io {
            path: package.to_path_buf(),
            source,
        })?;
    drop(entry);
    parser.leading_certificate(&block).map(Some)
}

/// Decide which policy label a certificate corresponds to.
///
/// For each `(label, signature)` pair in index order, tests whether the
/// base64 form of the decoded signature occurs as a substring of the
/// certificate text with line breaks stripped. First hit wins. This is a
/// containment heuristic over the PEM encoding, not a cryptographic
/// comparison.
pub fn match_signature<'a>(cert: &[u8], index: &'a PolicyIndex) -> Option<&'a str> {
    let stripped: String = String::from_utf8_lossy(cert)
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    for (label, entry) in index.iter() {
        if stripped.contains(&entry.signature_b64) {
            return Some(label);
        }
    }
    None
}
