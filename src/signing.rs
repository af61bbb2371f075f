//! Signing keys and the external signing primitive.
//!
//! The actual signature rewrite is delegated to the platform's `signapk`
//! tool; this module wraps it behind the async [`PackageSigner`] seam so the
//! pipeline can be driven with a fake signer in tests. Signer failures are
//! deliberately fatal — the pipeline never catches them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::SignapkConfig;

/// One label's signing material.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// The seinfo label this key signs for.
    pub label: String,
    /// PEM X.509 certificate path.
    pub certificate_path: PathBuf,
    /// PKCS#8 private key path.
    pub key_path: PathBuf,
}

/// Label→key mapping supplied by the caller, immutable for the run.
pub type KeyStore = HashMap<String, SigningKey>;

/// Errors from the external signing invocation.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The signer process could not be launched.
    #[error("failed to launch {command}: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The signer process exited unsuccessfully.
    #[error("signapk failed for {package} ({status}): {stderr}")]
    Failed {
        /// Package being signed.
        package: PathBuf,
        /// Child exit status.
        status: std::process::ExitStatus,
        /// Captured stderr text.
        stderr: String,
    },
    /// Replacing the package with the signed output failed.
    #[error("failed to replace {package} with signed output: {source}")]
    Replace {
        /// Package being signed.
        package: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// The opaque signing primitive: rewrites a package's signature in place.
#[async_trait]
pub trait PackageSigner: Send + Sync {
    /// Re-sign `package` with `key`, mutating the file in place.
    ///
    /// # Errors
    ///
    /// Implementations return [`SignerError`] on any failure; callers treat
    /// these as fatal.
    async fn sign(&self, package: &Path, key: &SigningKey) -> Result<(), SignerError>;
}

/// Signer backed by the `signapk` JAR.
///
/// Invokes `java -Xmx<heap>m [-Djava.library.path=<libs>] -jar signapk.jar
/// <cert> <key> <in> <staging>` and renames the staging output over the
/// package on success.
#[derive(Debug, Clone)]
pub struct SignapkSigner {
    java: PathBuf,
    jar: PathBuf,
    libs_dir: Option<PathBuf>,
    max_heap_mb: u32,
}

impl SignapkSigner {
    /// Build a signer from the `[signapk]` configuration section.
    pub fn new(config: &SignapkConfig) -> Self {
        Self {
            java: config.java.clone(),
            jar: config.jar.clone(),
            libs_dir: config.libs_dir.clone(),
            max_heap_mb: config.max_heap_mb,
        }
    }

    fn staging_path(package: &Path) -> PathBuf {
        let mut name = package.as_os_str().to_owned();
        name.push(".signed");
        PathBuf::from(name)
    }
}

#[async_trait]
impl PackageSigner for SignapkSigner {
    async fn sign(&self, package: &Path, key: &SigningKey) -> Result<(), SignerError> {
        let staging = Self::staging_path(package);

        let mut cmd = Command::new(&self.java);
        cmd.arg(format!("-Xmx{}m", self.max_heap_mb));
        if let Some(libs) = &self.libs_dir {
            cmd.arg(format!("-Djava.library.path={}", libs.display()));
        }
        cmd.arg("-jar")
            .arg(&self.jar)
            .arg(&key.certificate_path)
            .arg(&key.key_path)
            .arg(package)
            .arg(&staging);

        debug!(
            package = %package.display(),
            label = %key.label,
            "invoking signapk"
        );
        let output = cmd.output().await.map_err(|source| SignerError::Spawn {
            command: self.java.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            // signapk may have left a half-written staging file behind
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(SignerError::Failed {
                package: package.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        tokio::fs::rename(&staging, package)
            .await
            .map_err(|source| SignerError::Replace {
                package: package.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}
