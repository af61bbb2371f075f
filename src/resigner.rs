//! Partition orchestrator driving the per-package re-sign pipeline.
//!
//! Partitions are processed one at a time. Within a partition, packages run
//! through extract→match→sign either sequentially or on a bounded pool of
//! tokio tasks; every task returns a [`PackageOutcome`] record and all
//! accounting happens after the fork-join barrier, so the result of a
//! partition pass does not depend on scheduling order. The policy document
//! is rewritten once per partition, strictly after the barrier.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::certificate::{extract_certificate, match_signature, CertificateError, SignatureParser};
use crate::config::ResignConfig;
use crate::partitions::Partition;
use crate::policy::{find_policy_document, update_policy_document, PolicyError, PolicyIndex};
use crate::signing::{KeyStore, PackageSigner, SignerError};
use crate::xattrs::{SecurityAttrs, SECURITY_CONTEXT_ATTR};

/// Package name suffixes eligible for re-signing.
pub const PACKAGE_SUFFIXES: [&str; 3] = [".apk", ".jar", ".apex"];

/// Fatal errors aborting a re-sign run.
///
/// Everything recoverable (unsigned, unmatched, unkeyed packages) is a
/// [`PackageOutcome`], not an error.
#[derive(Debug, thiserror::Error)]
pub enum ResignError {
    /// Policy document parsing or rewriting failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// A package archive could not be read.
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    /// The signing primitive failed.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// Reading a package's security context failed.
    #[error("failed to read security context of {path}: {source}")]
    ContextRead {
        /// Package path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Restoring a package's security context after signing failed.
    #[error("failed to restore security context on {path}: {source}")]
    ContextRestore {
        /// Package path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A worker task panicked or was cancelled.
    #[error("package task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// The worker pool semaphore closed unexpectedly.
    #[error("worker pool closed unexpectedly")]
    Pool,
}

/// Outcome of one package's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// Re-signed under the given label.
    Resigned(String),
    /// No signature-block entry in the archive.
    NoSignature,
    /// Certificate matched no policy label.
    Unmatched,
    /// The matched label has no configured signing key.
    NoKey(String),
}

/// Counters accumulated across the whole run.
///
/// Deliberately never reset between partitions; per-partition summaries
/// report these running totals next to the partition-local tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Packages whose pipeline ran (resigned + skipped).
    pub total_processed: usize,
    /// Packages re-signed.
    pub resigned: usize,
    /// Packages skipped (unsigned, unmatched, or unkeyed).
    pub skipped: usize,
}

impl RunCounters {
    fn absorb(&mut self, outcome: &PackageOutcome) {
        self.total_processed = self.total_processed.saturating_add(1);
        match outcome {
            PackageOutcome::Resigned(_) => self.resigned = self.resigned.saturating_add(1),
            PackageOutcome::NoSignature
            | PackageOutcome::Unmatched
            | PackageOutcome::NoKey(_) => self.skipped = self.skipped.saturating_add(1),
        }
    }
}

/// Shared collaborators for one partition's package tasks.
///
/// Every task gets a clone; nothing in here is mutated during the pass.
#[derive(Clone)]
struct PartitionContext {
    index: Arc<PolicyIndex>,
    keys: Arc<KeyStore>,
    signer: Arc<dyn PackageSigner>,
    parser: Arc<dyn SignatureParser>,
    attrs: Arc<dyn SecurityAttrs>,
}

/// Re-signs every matching package across a set of partitions.
pub struct RomResigner {
    keys: Arc<KeyStore>,
    signer: Arc<dyn PackageSigner>,
    parser: Arc<dyn SignatureParser>,
    attrs: Arc<dyn SecurityAttrs>,
    parallel: bool,
    workers: usize,
    counters: RunCounters,
}

impl RomResigner {
    /// Create an orchestrator over the supplied keys and collaborators.
    pub fn new(
        keys: KeyStore,
        signer: Arc<dyn PackageSigner>,
        parser: Arc<dyn SignatureParser>,
        attrs: Arc<dyn SecurityAttrs>,
        resign: &ResignConfig,
    ) -> Self {
        Self {
            keys: Arc::new(keys),
            signer,
            parser,
            attrs,
            parallel: resign.parallel,
            workers: resign.workers.max(1),
            counters: RunCounters::default(),
        }
    }

    /// Cumulative counters for the run so far.
    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    /// Process every partition in order, one at a time.
    ///
    /// Returns the cumulative run counters.
    ///
    /// # Errors
    ///
    /// Any [`ResignError`] aborts the run; partitions already processed keep
    /// their on-disk changes.
    pub async fn resign(&mut self, partitions: &[Partition]) -> Result<RunCounters, ResignError> {
        for partition in partitions {
            self.process_partition(partition).await?;
        }
        Ok(self.counters)
    }

    async fn process_partition(&mut self, partition: &Partition) -> Result<(), ResignError> {
        let Some(policy_path) = find_policy_document(&partition.path)? else {
            debug!(partition = %partition.name, "no policy document found, skipping partition");
            return Ok(());
        };
        debug!(
            partition = %partition.name,
            path = %policy_path.display(),
            "found policy document"
        );

        let index = Arc::new(PolicyIndex::load(&policy_path)?);
        let packages = find_packages(&partition.path);
        debug!(
            partition = %partition.name,
            count = packages.len(),
            "found candidate packages"
        );

        let context = PartitionContext {
            index,
            keys: Arc::clone(&self.keys),
            signer: Arc::clone(&self.signer),
            parser: Arc::clone(&self.parser),
            attrs: Arc::clone(&self.attrs),
        };
        let outcomes = if self.parallel {
            self.run_pool(packages, context).await?
        } else {
            run_sequential(packages, context).await?
        };

        // Barrier passed; all accounting happens here on the control thread.
        let mut tally = RunCounters::default();
        let mut used_labels: HashSet<String> = HashSet::new();
        for outcome in &outcomes {
            tally.absorb(outcome);
            self.counters.absorb(outcome);
            if let PackageOutcome::Resigned(label) = outcome {
                used_labels.insert(label.clone());
            }
        }

        let rewritten = update_policy_document(&policy_path, &used_labels, &self.keys)?;
        debug!(
            partition = %partition.name,
            rewritten,
            "updated policy document"
        );
        info!(
            partition = %partition.name,
            processed = tally.total_processed,
            resigned = tally.resigned,
            skipped = tally.skipped,
            run_processed = self.counters.total_processed,
            run_resigned = self.counters.resigned,
            run_skipped = self.counters.skipped,
            "partition complete"
        );
        Ok(())
    }

    async fn run_pool(
        &self,
        packages: Vec<PathBuf>,
        context: PartitionContext,
    ) -> Result<Vec<PackageOutcome>, ResignError> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<Result<PackageOutcome, ResignError>> = JoinSet::new();
        let expected = packages.len();

        for package in packages {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ResignError::Pool)?;
            let context = context.clone();
            tasks.spawn(async move {
                let _permit = permit;
                process_package(package, context).await
            });
        }

        let mut outcomes = Vec::with_capacity(expected);
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined??);
        }
        Ok(outcomes)
    }
}

async fn run_sequential(
    packages: Vec<PathBuf>,
    context: PartitionContext,
) -> Result<Vec<PackageOutcome>, ResignError> {
    let mut outcomes = Vec::with_capacity(packages.len());
    for package in packages {
        outcomes.push(process_package(package, context.clone()).await?);
    }
    Ok(outcomes)
}

/// Run one package through extract→match→sign.
///
/// Recoverable skip conditions come back as [`PackageOutcome`] variants;
/// archive, signer, and attribute errors propagate and abort the run.
async fn process_package(
    package: PathBuf,
    context: PartitionContext,
) -> Result<PackageOutcome, ResignError> {
    let file_name = package
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Archive reads are blocking; keep them off the async workers.
    let cert = {
        let parser = Arc::clone(&context.parser);
        let path = package.clone();
        tokio::task::spawn_blocking(move || extract_certificate(&path, parser.as_ref())).await??
    };
    let Some(cert) = cert else {
        debug!(package = %file_name, "no signature found, skipping");
        return Ok(PackageOutcome::NoSignature);
    };

    let Some(label) = match_signature(&cert, &context.index) else {
        debug!(package = %file_name, "unknown signature, skipping");
        return Ok(PackageOutcome::Unmatched);
    };
    let label = label.to_owned();

    let Some(key) = context.keys.get(&label) else {
        debug!(package = %file_name, label = %label, "no key for label, skipping");
        return Ok(PackageOutcome::NoKey(label));
    };

    let security_context = context
        .attrs
        .get(&package, SECURITY_CONTEXT_ATTR)
        .map_err(|source| ResignError::ContextRead {
            path: package.clone(),
            source,
        })?;

    context.signer.sign(&package, key).await?;
    debug!(package = %file_name, label = %label, "signed");

    // Re-signing rewrites the file and drops its security context.
    if let Some(value) = security_context {
        context
            .attrs
            .set(&package, SECURITY_CONTEXT_ATTR, &value)
            .map_err(|source| ResignError::ContextRestore {
                path: package.clone(),
                source,
            })?;
        debug!(package = %file_name, "restored security context");
    }

    Ok(PackageOutcome::Resigned(label))
}

/// Recursively enumerate candidate packages under a partition tree.
fn find_packages(root: &Path) -> Vec<PathBuf> {
    let mut packages = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if PACKAGE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            packages.push(entry.into_path());
        }
    }
    packages
}
