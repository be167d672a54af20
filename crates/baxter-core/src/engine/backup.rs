//! Backup runner: scan the configured roots, encrypt and upload new or
//! changed files, then persist a snapshot of the manifest.
//!
//! Uploads proceed in path-ascending order (the plan is already sorted) so
//! a run's effects are deterministic for testing. A terminal upload
//! failure — retries exhausted — aborts the whole pass; partial writes
//! already landed in the store are left for `gc` to reclaim.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::crypto;
use crate::manifest::{self, Manifest};

use super::EngineContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub uploaded: usize,
    pub bytes_uploaded: u64,
    pub total: usize,
    /// Count of paths present in the previous manifest but absent now.
    /// Informational only: these objects are intentionally left in the
    /// store and are reclaimed only by `gc`.
    pub removed: usize,
    pub removed_paths: Vec<String>,
    pub snapshot_id: String,
}

pub async fn run(ctx: &EngineContext) -> Result<BackupReport> {
    let started_at = Utc::now();
    info!(roots = ctx.config.backup_roots.len(), "starting backup");

    let previous = Manifest::load(&ctx.paths.manifest_path())?;
    let current = manifest::build(
        &ctx.config.backup_roots,
        &ctx.config.exclude_paths,
        &ctx.config.exclude_globs,
    )?;
    let plan = manifest::plan(&previous, &current);

    let mut uploaded = 0usize;
    let mut bytes_uploaded = 0u64;

    for entry in &plan.new_or_changed {
        let size = upload_entry_with_retry(ctx, &entry.path).await?;
        uploaded += 1;
        bytes_uploaded += size;
    }

    if !plan.removed_paths.is_empty() {
        info!(
            count = plan.removed_paths.len(),
            "paths removed from backup roots; objects retained until gc"
        );
    }

    current.save(&ctx.paths.manifest_path())?;
    let record = manifest::snapshot_save(&ctx.paths.snapshots_dir(), &current)?;
    let pruned = manifest::snapshot_prune(&ctx.paths.snapshots_dir(), ctx.config.retention.manifest_snapshots)?;
    if pruned > 0 {
        info!(pruned, "pruned old manifest snapshots");
    }

    let finished_at = Utc::now();
    info!(uploaded, bytes_uploaded, "backup complete");

    Ok(BackupReport {
        started_at,
        finished_at,
        uploaded,
        bytes_uploaded,
        total: current.entries.len(),
        removed: plan.removed_paths.len(),
        removed_paths: plan.removed_paths,
        snapshot_id: record.id,
    })
}

async fn upload_entry_with_retry(ctx: &EngineContext, path: &str) -> Result<u64> {
    let max_attempts = ctx.config.upload_max_attempts().max(1);
    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match upload_entry(ctx, path).await {
            Ok(size) => return Ok(size),
            Err(e) => {
                warn!(path, attempt, max_attempts, error = %e, "upload attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Store(format!("{path}: upload failed with no recorded error"))))
}

async fn upload_entry(ctx: &EngineContext, path: &str) -> Result<u64> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| crate::error::Error::io(path, e))?;
    let size = bytes.len() as u64;
    let envelope = crypto::encrypt(&ctx.encrypt_key, &bytes)?;
    let key = manifest::object_key_for_path(path);
    ctx.store.put(&key, envelope).await?;
    Ok(size)
}
