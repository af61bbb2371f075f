//! romkit — re-signs packages inside decompiled Android partitions.
//!
//! After a partition image is unpacked, edited, and repacked, its `.apk`,
//! `.jar`, and `.apex` packages must carry signatures consistent with the
//! partition's `mac_permissions.xml` policy or the platform refuses to load
//! them. romkit matches each package's embedded certificate against that
//! policy, re-signs matches with the configured key, preserves the
//! `security.selinux` attribute across signing, and rewrites the policy
//! document for every label actually used.
//!
//! See `DESIGN.md` for the module ledger and design decisions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod config;
pub mod logging;
pub mod partitions;
pub mod policy;
pub mod resigner;
pub mod signing;
pub mod xattrs;
