// soma_import - SOMA image import CLI
// Imports pending uploads into the managed image store

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use soma_import::keys::{decode_key, SECRET_KEY_LENGTH};
use soma_import::metrics::MetricsListener;
use soma_import::{
    run_import, FileImporter, ImportContext, ImporterConfig, Listeners, LogListener,
    MetricsSnapshot,
};

#[derive(Parser)]
#[command(
    name = "soma_import",
    version,
    about = "SOMA Image Import - pending uploads to the image store"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "SOMA_IMPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Managed storage root (overrides the config file)
    #[arg(long, env = "SOMA_IMPORT_ROOT")]
    root: Option<PathBuf>,

    /// Pending staging area
    #[arg(long)]
    pending_path: Option<PathBuf>,

    /// Area of uploads still being written
    #[arg(long)]
    writing_path: Option<PathBuf>,

    /// Import collection children on the worker pool
    #[arg(long)]
    task_queue: bool,

    /// Worker pool size (0 = one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a file from the pending area
    Import {
        file: PathBuf,

        /// Name of the upload in the store (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Copy the pending file instead of moving it
        #[arg(long)]
        copy: bool,
    },

    /// Import a path without moving it
    ImportInPlace {
        path: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },

    /// List known formats
    Formats,

    /// Check that a base64 secret key decodes
    DecodeKey {
        #[arg(long, env = "SOMA_IMPORT_PRIVATE_KEY", hide_env_values = true)]
        key: String,
    },
}

#[derive(Serialize)]
struct ImportReport {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    imported: Vec<PathBuf>,
    metrics: MetricsSnapshot,
}

fn load_config(args: &Args) -> Result<ImporterConfig> {
    let mut config = match &args.config {
        Some(path) => ImporterConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ImporterConfig::default(),
    };

    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(pending) = &args.pending_path {
        config.pending_path = pending.clone();
    }
    if let Some(writing) = &args.writing_path {
        config.writing_path = writing.clone();
    }
    if args.task_queue {
        config.task_queue_enabled = true;
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }

    Ok(config.absolutized())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match &args.command {
        Command::Import { file, name, copy } => {
            info!("Importing {}", file.display());
            info!("   Root: {}", config.root.display());

            let ctx = ImportContext::new(config);
            let name = name.clone().unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            let started_at = Utc::now();
            let imported = run_import(&ctx, file, &name, Vec::new(), *copy)
                .with_context(|| format!("Import of {} failed", file.display()))?;

            print_json(&ImportReport {
                started_at,
                finished_at: Utc::now(),
                imported,
                metrics: ctx.metrics().snapshot(),
            })?;
        }
        Command::ImportInPlace { path, name } => {
            let ctx = ImportContext::new(config);
            let name = name.clone().unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let listeners = Listeners::new()
                .with(LogListener::new(name.clone()))
                .with(MetricsListener::new(ctx.metrics().clone()));

            let started_at = Utc::now();
            let upload_path = FileImporter::new(&ctx, path, Some(name), listeners)
                .import_in_place()
                .with_context(|| format!("In-place import of {} failed", path.display()))?;

            print_json(&ImportReport {
                started_at,
                finished_at: Utc::now(),
                imported: vec![upload_path],
                metrics: ctx.metrics().snapshot(),
            })?;
        }
        Command::Formats => {
            let ctx = ImportContext::new(config);
            let formats = ctx.formats();
            let listing: Vec<serde_json::Value> = formats
                .identifiers()
                .into_iter()
                .filter_map(|id| formats.get(&id))
                .map(|format| {
                    serde_json::json!({
                        "identifier": format.identifier(),
                        "archive": format.is_archive(),
                        "spatial": format.is_spatial(),
                        "converts_to": format.conversion_identifier(),
                    })
                })
                .collect();
            print_json(&listing)?;
        }
        Command::DecodeKey { key } => {
            decode_key(key).context("Invalid secret key")?;
            info!("✓ Secret key decoded ({} bytes)", SECRET_KEY_LENGTH);
        }
    }

    Ok(())
}
