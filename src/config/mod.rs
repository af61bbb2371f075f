//! Configuration loading and management.
//!
//! Loads romkit configuration from `./romkit.toml` (or `$ROMKIT_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::signing::{KeyStore, SigningKey};

// ── Top-level config ────────────────────────────────────────────

/// Top-level romkit configuration loaded from TOML.
///
/// Path: `./romkit.toml` or `$ROMKIT_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RomkitConfig {
    /// Re-sign pipeline settings (`[resign]`).
    pub resign: ResignConfig,
    /// External signer settings (`[signapk]`).
    pub signapk: SignapkConfig,
    /// Signing keys by seinfo label (`[keys.<label>]`).
    pub keys: BTreeMap<String, KeyConfig>,
}

/// Re-sign pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResignConfig {
    /// Process packages with a bounded worker pool instead of one at a time.
    pub parallel: bool,
    /// Worker-pool size when `parallel` is set.
    pub workers: usize,
}

impl Default for ResignConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            workers: 8,
        }
    }
}

/// External signer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignapkConfig {
    /// Java executable used to run the signer.
    pub java: PathBuf,
    /// Path to `signapk.jar`.
    pub jar: PathBuf,
    /// Native library directory passed as `-Djava.library.path`.
    pub libs_dir: Option<PathBuf>,
    /// JVM heap ceiling in megabytes.
    pub max_heap_mb: u32,
}

impl Default for SignapkConfig {
    fn default() -> Self {
        let signapk_dir = default_binaries_dir().join("signapk");
        Self {
            java: PathBuf::from("java"),
            jar: signapk_dir.join("signapk.jar"),
            libs_dir: Some(signapk_dir.join("libs")),
            max_heap_mb: 2048,
        }
    }
}

/// One signing key's file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    /// PEM X.509 certificate path.
    pub certificate: PathBuf,
    /// PKCS#8 private key path.
    pub key: PathBuf,
}

/// Platform data directory for bundled external tools.
///
/// Falls back to a relative `binaries/` directory when the platform
/// provides no data directory at all.
pub fn default_binaries_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "romkit", "romkit")
        .map(|dirs| dirs.data_dir().join("binaries"))
        .unwrap_or_else(|| PathBuf::from("binaries"))
}

impl RomkitConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$ROMKIT_CONFIG_PATH` or `./romkit.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: RomkitConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(RomkitConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("ROMKIT_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("romkit.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var`
    /// in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROMKIT_WORKERS") {
            match v.parse() {
                Ok(n) => self.resign.workers = n,
                Err(_) => tracing::warn!(
                    var = "ROMKIT_WORKERS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("ROMKIT_PARALLEL") {
            match v.parse() {
                Ok(b) => self.resign.parallel = b,
                Err(_) => tracing::warn!(
                    var = "ROMKIT_PARALLEL",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("ROMKIT_JAVA") {
            self.signapk.java = PathBuf::from(v);
        }
        if let Some(v) = env("ROMKIT_SIGNAPK_JAR") {
            self.signapk.jar = PathBuf::from(v);
        }
    }

    /// Build the label→key mapping handed to the orchestrator.
    pub fn signing_keys(&self) -> KeyStore {
        self.keys
            .iter()
            .map(|(label, key)| {
                (
                    label.clone(),
                    SigningKey {
                        label: label.clone(),
                        certificate_path: key.certificate.clone(),
                        key_path: key.key.clone(),
                    },
                )
            })
            .collect()
    }
}
