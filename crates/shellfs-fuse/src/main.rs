//! shellfs - Mount a directory tree with command-backed virtual files.
//!
//! Usage: shellfs <MOUNTPOINT> <SOURCE>
//!
//! Directories in the source tree whose names are wrapped in the marker
//! character (`#report#` by default) appear as single regular files whose
//! content is the standard output of the `cmd` executable inside them.

use anyhow::{Context, Result};
use clap::Parser;
use shellfs_core::{Indexer, ScanConfig, DEFAULT_MARKER};
use shellfs_fuse::{MountConfig, ShellFs};
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shellfs")]
#[command(about = "Mount a directory tree with command-backed virtual files")]
#[command(version)]
struct Cli {
    /// Mountpoint for the filesystem
    mountpoint: PathBuf,

    /// Source directory to project
    source: PathBuf,

    /// Marker character wrapping command directory names
    #[arg(long, default_value_t = DEFAULT_MARKER)]
    marker: char,

    /// Block until all file sizes are resolved before mounting
    #[arg(long)]
    wait_stable: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Automatically unmount when the process exits
    #[arg(long)]
    auto_unmount: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if !cli.mountpoint.is_dir() {
        anyhow::bail!("Mountpoint is not a directory: {}", cli.mountpoint.display());
    }
    let source = cli
        .source
        .canonicalize()
        .with_context(|| format!("Source directory not accessible: {}", cli.source.display()))?;

    // The scan pipeline runs on this runtime; it must outlive the mount
    // so late size resolutions still land.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let indexer = runtime.block_on(async {
        let indexer = Indexer::new(ScanConfig { marker: cli.marker });
        let ticket = indexer
            .scan(&source)
            .await
            .context("Initial scan failed")?;
        info!(generation = ticket.generation(), "Index published");
        if cli.wait_stable {
            ticket.stable().await;
            info!("All file sizes resolved");
        }
        Ok::<_, anyhow::Error>(indexer)
    })?;

    let _guard = runtime.enter();
    let fs = ShellFs::new(indexer.catalog(), source.clone());

    let config = MountConfig {
        allow_other: cli.allow_other,
        auto_unmount: cli.auto_unmount,
        ..MountConfig::default()
    };

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    info!(
        source = %source.display(),
        mountpoint = %cli.mountpoint.display(),
        "Mounting filesystem (press Ctrl+C to unmount)"
    );

    let session = fuser::spawn_mount2(fs, &cli.mountpoint, &config.options()).map_err(|e| {
        error!(error = %e, "Mount failed");
        anyhow::anyhow!("Failed to mount filesystem: {e}")
    })?;

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    drop(session);
    info!("Filesystem unmounted");
    Ok(())
}
