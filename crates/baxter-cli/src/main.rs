use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use baxter_core::config::Config;
use baxter_core::engine::{self, EngineContext};
use baxter_core::manifest::{self, Manifest};
use baxter_core::objectstore::{LocalObjectStore, ObjectStore, RemoteObjectStore};
use baxter_core::passphrase::PassphraseProvider;
use baxter_core::paths::StatePaths;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "baxter")]
#[command(about = "Baxter encrypted backup engine", long_about = None)]
struct Cli {
    /// Path to config.toml. Defaults to the per-user state directory's copy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run or inspect a backup
    #[command(subcommand)]
    Backup(BackupCommands),
    /// Inspect manifest snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Restore a file from the manifest, or list candidates
    Restore(RestoreArgs),

    /// Re-verify stored objects against their manifest checksums
    Verify(VerifyArgs),

    /// Delete objects no longer referenced by any manifest
    Gc {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Perform a backup pass now
    Run,
    /// Print the last manifest's summary
    Status,
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// List manifest snapshots, newest first
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(clap::Args)]
struct RestoreArgs {
    /// Path to restore. Omit with --list to browse candidates instead.
    path: Option<String>,

    #[arg(long)]
    list: bool,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    contains: Option<String>,

    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    verify_only: bool,
    #[arg(long = "to")]
    destination: Option<PathBuf>,
    #[arg(long)]
    overwrite: bool,
    #[arg(long)]
    snapshot: Option<String>,
}

#[derive(clap::Args)]
struct VerifyArgs {
    #[arg(long)]
    snapshot: Option<String>,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    sample: Option<usize>,
}

async fn build_context(config_path: &std::path::Path) -> Result<EngineContext> {
    build_context_with(config_path, |_| {}).await
}

async fn build_context_with(config_path: &std::path::Path, edit: impl FnOnce(&mut Config)) -> Result<EngineContext> {
    let paths = StatePaths::resolve().context("resolve state directory")?;
    paths.ensure_dirs().context("create state directories")?;
    let mut config = Config::load(config_path).context("load config")?;
    edit(&mut config);
    let passphrase = PassphraseProvider::new(
        config.encryption.keychain_service.clone(),
        config.encryption.keychain_account.clone(),
    )
    .resolve()
    .context("resolve backup passphrase")?;
    let store: Arc<dyn ObjectStore> = if config.s3.bucket.is_empty() {
        Arc::new(LocalObjectStore::new(paths.objects_dir()))
    } else {
        Arc::new(RemoteObjectStore::new(&config.s3).await.context("connect to remote store")?)
    };
    Ok(EngineContext::new(paths, config, store, &passphrase)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = StatePaths::resolve().context("resolve state directory")?;
    let config_path = cli.config.unwrap_or_else(|| paths.config_path());

    match cli.command {
        Commands::Backup(BackupCommands::Run) => {
            let ctx = build_context(&config_path).await?;
            let report = engine::backup::run(&ctx).await?;
            println!(
                "backup complete: {} uploaded, {} bytes, {} total, snapshot {}",
                report.uploaded, report.bytes_uploaded, report.total, report.snapshot_id
            );
        }
        Commands::Backup(BackupCommands::Status) => {
            let manifest = Manifest::load(&paths.manifest_path())?;
            println!(
                "manifest: {} entries, created {}",
                manifest.entries.len(),
                manifest.created_at.to_rfc3339()
            );
        }
        Commands::Snapshot(SnapshotCommands::List { limit }) => {
            let mut records = manifest::snapshot_list(&paths.snapshots_dir())?;
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            for r in &records {
                println!("{}  {} entries  {}", r.id, r.entry_count, r.created_at.to_rfc3339());
            }
        }
        Commands::Restore(args) => restore(&paths, &config_path, args).await?,
        Commands::Verify(args) => {
            let ctx = build_context_with(&config_path, |config| {
                if let Some(prefix) = &args.prefix {
                    config.verify.prefix = prefix.clone();
                }
                if let Some(limit) = args.limit {
                    config.verify.limit = limit;
                }
                if let Some(sample) = args.sample {
                    config.verify.sample = sample;
                }
            })
            .await?;
            let selector = args.snapshot.unwrap_or_default();
            let report = engine::verify::run(&ctx, &selector).await?;
            println!(
                "verify complete: {}/{} ok, {} missing, {} read errors, {} decrypt errors, {} checksum errors",
                report.ok, report.checked, report.missing, report.read_errors, report.decrypt_errors, report.checksum_errors
            );
            if report.has_failures() {
                std::process::exit(1);
            }
        }
        Commands::Gc { dry_run } => {
            let ctx = build_context(&config_path).await?;
            let report = engine::gc::run(&ctx, dry_run).await?;
            if report.skipped {
                println!("gc skipped: no manifests loaded");
            } else {
                println!(
                    "gc complete: {} deleted, {} retained, {} candidates{}",
                    report.deleted_keys.len(),
                    report.retained,
                    report.candidate_deletes,
                    if dry_run { " (dry run)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

async fn restore(paths: &StatePaths, config_path: &std::path::Path, args: RestoreArgs) -> Result<()> {
    let selector = args.snapshot.clone().unwrap_or_default();
    if args.list || args.path.is_none() {
        let manifest = manifest::resolve_selector(&paths.manifest_path(), &paths.snapshots_dir(), &selector)?;
        let prefix = args.prefix.unwrap_or_default();
        let contains = args.contains.unwrap_or_default();
        for entry in engine::restore::list(&manifest, &prefix, &contains) {
            println!("{}  {} bytes  {}", entry.path, entry.size, entry.modified.to_rfc3339());
        }
        return Ok(());
    }

    let path = args.path.expect("checked above");
    let ctx = build_context(config_path).await?;
    let report = engine::restore::run(
        &ctx,
        &selector,
        &path,
        args.destination.as_deref(),
        args.overwrite,
        args.dry_run,
        args.verify_only,
    )
    .await?;

    if args.dry_run {
        println!("dry run: would restore {} -> {}", report.plan.source_path, report.plan.target_path);
    } else if args.verify_only {
        println!("verified: {} matches manifest checksum", report.plan.source_path);
    } else {
        println!("restored {} -> {}", report.plan.source_path, report.plan.target_path);
    }
    Ok(())
}
