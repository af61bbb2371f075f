#![allow(missing_docs)]

//! romkit CLI — re-sign packages in decompiled Android partitions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use romkit::certificate::Pkcs7Parser;
use romkit::config::RomkitConfig;
use romkit::logging;
use romkit::partitions::Partition;
use romkit::policy::{find_policy_document, PolicyIndex};
use romkit::resigner::RomResigner;
use romkit::signing::SignapkSigner;
use romkit::xattrs::FsAttrs;

#[derive(Parser)]
#[command(
    name = "romkit",
    version,
    about = "Re-sign packages in decompiled Android partitions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-sign every matching package in the given partition trees.
    Resign {
        /// Decompiled partition directories.
        #[arg(required = true)]
        partitions: Vec<PathBuf>,
        /// Process packages one at a time instead of with the worker pool.
        #[arg(long)]
        sequential: bool,
        /// Worker-pool size (overrides the config file).
        #[arg(long)]
        workers: Option<usize>,
        /// Directory for JSON log files (daily rotation).
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Print the label table parsed from a partition's policy document.
    Policy {
        /// Decompiled partition directory.
        partition: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Resign {
            partitions,
            sequential,
            workers,
            log_dir,
        } => {
            let _guard = match &log_dir {
                Some(dir) => Some(logging::init_with_log_dir(dir)?),
                None => {
                    logging::init_cli();
                    None
                }
            };
            run_resign(partitions, sequential, workers).await
        }
        Command::Policy { partition } => {
            logging::init_cli();
            run_policy(&partition)
        }
    }
}

async fn run_resign(
    dirs: Vec<PathBuf>,
    sequential: bool,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = RomkitConfig::load().context("failed to load configuration")?;
    if sequential {
        config.resign.parallel = false;
    }
    if let Some(workers) = workers {
        config.resign.workers = workers;
    }

    let mut partitions = Vec::new();
    for dir in dirs {
        let partition = Partition::inspect(&dir)
            .with_context(|| format!("failed to inspect partition at {}", dir.display()))?;
        info!(
            name = %partition.name,
            path = %partition.path.display(),
            "inspected partition"
        );
        partitions.push(partition);
    }

    let keys = config.signing_keys();
    if keys.is_empty() {
        warn!("no signing keys configured; every matched package will be skipped");
    }

    let signer = Arc::new(SignapkSigner::new(&config.signapk));
    let mut resigner = RomResigner::new(
        keys,
        signer,
        Arc::new(Pkcs7Parser),
        Arc::new(FsAttrs),
        &config.resign,
    );
    let counters = resigner
        .resign(&partitions)
        .await
        .context("re-sign run failed")?;

    info!(
        processed = counters.total_processed,
        resigned = counters.resigned,
        skipped = counters.skipped,
        "run complete"
    );
    println!(
        "processed {} packages: {} resigned, {} skipped",
        counters.total_processed, counters.resigned, counters.skipped
    );
    Ok(())
}

fn run_policy(dir: &std::path::Path) -> Result<()> {
    let partition = Partition::inspect(dir)
        .with_context(|| format!("failed to inspect partition at {}", dir.display()))?;
    let Some(path) = find_policy_document(&partition.path)? else {
        anyhow::bail!("no policy document found for {} partition", partition.name);
    };
    let index = PolicyIndex::load(&path)?;
    println!("{} ({} labels)", path.display(), index.len());
    for (label, entry) in index.iter() {
        println!("{label}\t{}", entry.signature_hex);
    }
    Ok(())
}
