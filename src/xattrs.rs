//! Extended-attribute access behind a capability seam.
//!
//! Re-signing rewrites a package file in place, which clears its
//! `security.selinux` attribute; the pipeline captures the attribute before
//! signing and restores it afterwards. The trait exists so tests can swap in
//! an in-memory store — real `security.*` attributes need privileges a test
//! run does not have.

use std::io;
use std::path::Path;

/// Name of the attribute carrying a file's mandatory-access-control label.
pub const SECURITY_CONTEXT_ATTR: &str = "security.selinux";

/// Read/write access to one named extended attribute per file.
pub trait SecurityAttrs: Send + Sync {
    /// Read an attribute. A file without the attribute is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error for anything other than the
    /// attribute being absent.
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Write an attribute, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on failure.
    fn set(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()>;
}

/// Filesystem-backed implementation over the platform xattr API.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAttrs;

impl SecurityAttrs for FsAttrs {
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
        xattr::get(path, name)
    }

    fn set(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
        xattr::set(path, name, value)
    }
}
