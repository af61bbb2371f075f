//! Security-label policy documents (`mac_permissions.xml`).
//!
//! Each partition ships a policy document under `etc/selinux/` mapping
//! signing certificates to seinfo labels. [`PolicyIndex`] is the parsed
//! label→signature view used to match packages;
//! [`update_policy_document`] writes the new certificate material back for
//! the labels a re-sign pass actually used.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use der::{DecodePem, Encode};
use indexmap::IndexMap;
use x509_cert::Certificate;

use crate::signing::SigningKey;

/// Substring that identifies a policy document inside `etc/selinux/`.
///
/// Vendors prefix the file (`plat_mac_permissions.xml`,
/// `vendor_mac_permissions.xml`), so the lookup is contains, not equals.
pub const POLICY_FILE_MARKER: &str = "mac_permissions.xml";

/// Errors from parsing or rewriting a policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Reading or writing the document (or a key certificate) failed.
    #[error("policy I/O failed for {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The document is not well-formed XML.
    #[error("malformed policy document: {0}")]
    Xml(#[from] roxmltree::Error),
    /// A `signer` or `seinfo` element is missing a required attribute.
    #[error("{element} element is missing its {attribute} attribute")]
    MissingAttribute {
        /// Element name.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
    },
    /// A `signature` attribute does not decode as hex.
    #[error("signature for label {label} is not valid hex: {source}")]
    BadHex {
        /// The seinfo label whose signature is malformed.
        label: String,
        /// Underlying decode error.
        source: hex::FromHexError,
    },
    /// A used label has no registered signing key.
    #[error("no signing key registered for used label {0}")]
    MissingKey(String),
    /// A signing key's certificate file does not parse as a PEM X.509 cert.
    #[error("failed to parse certificate {path}: {source}")]
    Certificate {
        /// Certificate file path.
        path: PathBuf,
        /// Underlying DER/PEM error.
        source: der::Error,
    },
}

/// One label's signature material from the policy document.
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    /// Hex-encoded signature exactly as it appears in the document.
    pub signature_hex: String,
    /// Base64 rendering of the decoded signature bytes — the form that
    /// appears inside a PEM certificate body.
    pub signature_b64: String,
}

/// Label→signature index built from one partition's policy document.
///
/// Iteration order is document order of each label's first occurrence;
/// a label repeated later in the document overwrites the earlier signature
/// (last-wins).
#[derive(Debug, Default)]
pub struct PolicyIndex {
    entries: IndexMap<String, PolicyEntry>,
}

impl PolicyIndex {
    /// Parse a policy document from its XML text.
    ///
    /// Walks every `signer` child of the root and records
    /// `seinfo.value → signer.signature` for each nested `seinfo`. Hex
    /// signatures are decoded eagerly so malformed material surfaces here
    /// rather than mid-run.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Xml`] for malformed XML,
    /// [`PolicyError::MissingAttribute`] for signer/seinfo elements without
    /// their required attributes, and [`PolicyError::BadHex`] for
    /// non-hex signature values.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let doc = roxmltree::Document::parse(text)?;
        let mut entries = IndexMap::new();
        for signer in doc
            .root_element()
            .children()
            .filter(|n| n.has_tag_name("signer"))
        {
            let signature = signer
                .attribute("signature")
                .ok_or(PolicyError::MissingAttribute {
                    element: "signer",
                    attribute: "signature",
                })?;
            for seinfo in signer.children().filter(|n| n.has_tag_name("seinfo")) {
                let value = seinfo
                    .attribute("value")
                    .ok_or(PolicyError::MissingAttribute {
                        element: "seinfo",
                        attribute: "value",
                    })?;
                let raw = hex::decode(signature).map_err(|source| PolicyError::BadHex {
                    label: value.to_owned(),
                    source,
                })?;
                entries.insert(
                    value.to_owned(),
                    PolicyEntry {
                        signature_hex: signature.to_owned(),
                        signature_b64: BASE64_STANDARD.encode(raw),
                    },
                );
            }
        }
        Ok(Self { entries })
    }

    /// Load and parse the policy document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Io`] when the file cannot be read, otherwise
    /// the same errors as [`PolicyIndex::parse`].
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Number of distinct labels in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the document defined no labels.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up one label's entry.
    pub fn get(&self, label: &str) -> Option<&PolicyEntry> {
        self.entries.get(label)
    }

    /// Iterate `(label, entry)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PolicyEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Locate a partition's policy document.
///
/// Searches `<partition>/etc/selinux/` for a file whose name contains
/// [`POLICY_FILE_MARKER`]. A missing directory or no matching file is
/// `Ok(None)` — the orchestrator skips such partitions.
///
/// # Errors
///
/// Returns [`PolicyError::Io`] only for directory read failures other than
/// the directory not existing.
pub fn find_policy_document(partition: &Path) -> Result<Option<PathBuf>, PolicyError> {
    let dir = partition.join("etc").join("selinux");
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(PolicyError::Io { path: dir, source }),
    };
    for entry in entries {
        let entry = entry.map_err(|source| PolicyError::Io {
            path: dir.clone(),
            source,
        })?;
        if entry.file_name().to_string_lossy().contains(POLICY_FILE_MARKER) {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Rewrite the `signature` attributes of every signer whose seinfo label was
/// used in the just-finished partition pass.
///
/// The replacement value is the hex-encoded DER of the certificate at the
/// matching [`SigningKey`]'s `certificate_path`. Signers with several
/// `seinfo` children take the key of the last child present in
/// `used_labels`. The document text outside the replaced attribute spans is
/// written back byte-for-byte, so formatting and unrelated entries survive
/// exactly. Returns the number of signer elements rewritten.
///
/// # Errors
///
/// Returns [`PolicyError::MissingKey`] if a used label has no key (the
/// orchestrator never lets this happen), [`PolicyError::Certificate`] when a
/// key certificate does not parse, plus the usual I/O and XML errors.
pub fn update_policy_document(
    path: &Path,
    used_labels: &HashSet<String>,
    keys: &HashMap<String, SigningKey>,
) -> Result<usize, PolicyError> {
    let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut splices: Vec<(Range<usize>, String)> = Vec::new();
    {
        let doc = roxmltree::Document::parse(&text)?;
        for signer in doc
            .root_element()
            .children()
            .filter(|n| n.has_tag_name("signer"))
        {
            let mut used: Option<&str> = None;
            for seinfo in signer.children().filter(|n| n.has_tag_name("seinfo")) {
                if let Some(value) = seinfo.attribute("value") {
                    if used_labels.contains(value) {
                        used = Some(value);
                    }
                }
            }
            let Some(label) = used else { continue };

            let attr = signer
                .attributes()
                .find(|a| a.name() == "signature")
                .ok_or(PolicyError::MissingAttribute {
                    element: "signer",
                    attribute: "signature",
                })?;
            let key = keys
                .get(label)
                .ok_or_else(|| PolicyError::MissingKey(label.to_owned()))?;
            let der_hex = certificate_der_hex(&key.certificate_path)?;
            splices.push((attr.range(), format!("signature=\"{der_hex}\"")));
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, replacement) in &splices {
        out.push_str(&text[cursor..range.start]);
        out.push_str(replacement);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);

    std::fs::write(path, out).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(splices.len())
}

/// Hex-encoded DER serialization of the PEM certificate at `path`.
fn certificate_der_hex(path: &Path) -> Result<String, PolicyError> {
    let pem = std::fs::read(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cert = Certificate::from_pem(&pem).map_err(|source| PolicyError::Certificate {
        path: path.to_path_buf(),
        source,
    })?;
    let der = cert.to_der().map_err(|source| PolicyError::Certificate {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hex::encode(der))
}
