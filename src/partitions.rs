//! Partition model and content-based name detection.
//!
//! A [`Partition`] is one decompiled filesystem tree (system, vendor, or
//! product). Mounting, unmounting, and image resizing happen outside this
//! crate; callers hand over directories that are already readable.

use std::fmt;
use std::path::{Path, PathBuf};

/// Which partition a decompiled tree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionName {
    /// The `system` partition.
    System,
    /// The `vendor` partition.
    Vendor,
    /// The `product` partition.
    Product,
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::Vendor => "vendor",
            Self::Product => "product",
        };
        f.write_str(name)
    }
}

/// One decompiled partition tree.
///
/// Identity is the path; the name is derived once from content inspection
/// and the pair is immutable afterwards.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Detected partition name.
    pub name: PartitionName,
    /// Root of the partition's filesystem tree.
    pub path: PathBuf,
}

/// Errors from partition inspection.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Neither `<path>/build.prop` nor `<path>/system/build.prop` exists.
    #[error("could not find build.prop under {0}")]
    MissingBuildProp(PathBuf),
    /// Reading `build.prop` failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The `build.prop` path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl Partition {
    /// Inspect a decompiled tree and derive which partition it is.
    ///
    /// `build.prop` is looked up at the tree root first, then under
    /// `system/` (system images extracted as-root carry their content in a
    /// `system` subdirectory); in the latter case the partition path is
    /// rebased onto that subdirectory. The build date keys decide the name:
    /// `ro.system.build.date` means system, `ro.product.build.date` means
    /// product, anything else is vendor.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::MissingBuildProp`] when no `build.prop` is
    /// found in either location, or [`PartitionError::Io`] when it cannot be
    /// read.
    pub fn inspect(path: &Path) -> Result<Self, PartitionError> {
        let mut root = path.to_path_buf();
        if !root.join("build.prop").is_file() {
            root = path.join("system");
            if !root.join("build.prop").is_file() {
                return Err(PartitionError::MissingBuildProp(path.to_path_buf()));
            }
        }
        let build_prop = root.join("build.prop");
        let data = std::fs::read_to_string(&build_prop).map_err(|source| PartitionError::Io {
            path: build_prop,
            source,
        })?;

        let name = if data.contains("ro.system.build.date") {
            PartitionName::System
        } else if data.contains("ro.product.build.date") {
            PartitionName::Product
        } else {
            PartitionName::Vendor
        };

        Ok(Self { name, path: root })
    }
}
