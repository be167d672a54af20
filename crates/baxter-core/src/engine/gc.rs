//! Garbage collection: delete objects no longer referenced by any loaded
//! manifest (current or snapshot).
//!
//! Backups never delete objects for removed paths — only `gc` does, and only
//! after confirming it actually loaded manifests to check references
//! against.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::manifest::{self, Manifest};

use super::EngineContext;

#[derive(Debug, Clone, Serialize)]
pub struct GcReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// True when the safety rail fired: zero source manifests were loaded,
    /// so nothing was deleted regardless of `dry_run`.
    pub skipped: bool,
    pub objects_listed: usize,
    pub objects_referenced: usize,
    pub candidate_deletes: usize,
    pub retained: usize,
    pub deleted_keys: Vec<String>,
    pub errors: Vec<String>,
}

pub async fn run(ctx: &EngineContext, dry_run: bool) -> Result<GcReport> {
    let started_at = Utc::now();

    let manifest_path = ctx.paths.manifest_path();
    let mut manifests_loaded = 0usize;
    let mut referenced = HashSet::new();

    if manifest_path.exists() {
        let current = Manifest::load(&manifest_path)?;
        manifests_loaded += 1;
        referenced.extend(current.entries.iter().map(|e| manifest::object_key_for_path(&e.path)));
    }
    for record in manifest::snapshot_list(&ctx.paths.snapshots_dir())? {
        let snapshot = Manifest::load(&record.path)?;
        manifests_loaded += 1;
        referenced.extend(snapshot.entries.iter().map(|e| manifest::object_key_for_path(&e.path)));
    }

    let objects = ctx.store.list().await?;

    if manifests_loaded == 0 {
        warn!("gc safety rail: no source manifests loaded, skipping deletions");
        return Ok(GcReport {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            skipped: true,
            objects_listed: objects.len(),
            objects_referenced: 0,
            candidate_deletes: 0,
            retained: objects.len(),
            deleted_keys: Vec::new(),
            errors: Vec::new(),
        });
    }

    info!(
        objects = objects.len(),
        referenced = referenced.len(),
        dry_run,
        "starting gc"
    );

    let mut deleted_keys = Vec::new();
    let mut errors = Vec::new();
    let mut candidate_deletes = 0usize;
    let mut retained = 0usize;
    for key in &objects {
        if referenced.contains(key) {
            retained += 1;
            continue;
        }
        candidate_deletes += 1;
        if dry_run {
            continue;
        }
        match ctx.store.delete(key).await {
            Ok(()) => deleted_keys.push(key.clone()),
            Err(e) => errors.push(format!("{key}: {e}")),
        }
    }

    let finished_at = Utc::now();
    info!(deleted = deleted_keys.len(), errors = errors.len(), "gc complete");

    Ok(GcReport {
        started_at,
        finished_at,
        dry_run,
        skipped: false,
        objects_listed: objects.len(),
        objects_referenced: referenced.len(),
        candidate_deletes,
        retained,
        deleted_keys,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::objectstore::LocalObjectStore;
    use crate::paths::StatePaths;

    use super::*;

    async fn context(state_dir: &std::path::Path, roots: Vec<String>) -> EngineContext {
        let paths = StatePaths::with_root(state_dir.join("state"));
        paths.ensure_dirs().unwrap();
        let store = Arc::new(LocalObjectStore::new(state_dir.join("objects")));
        let config = Config {
            backup_roots: roots,
            ..Config::default()
        };
        EngineContext::new(paths, config, store, "test-passphrase").unwrap()
    }

    #[tokio::test]
    async fn gc_safety_rail_skips_when_no_manifests_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), vec![]).await;
        ctx.store.put("orphan.enc", b"x".to_vec()).await.unwrap();
        let report = run(&ctx, false).await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.deleted_keys.len(), 0);
        assert_eq!(report.retained, 1);
        assert!(ctx.store.get("orphan.enc").await.is_ok());
    }

    #[tokio::test]
    async fn gc_deletes_orphaned_objects_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let kept = source.join("kept.txt");
        tokio::fs::write(&kept, b"keep me").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let orphan_key = "deadbeef0000000000000000000000000000000000000000000000000000.enc";
        ctx.store.put(orphan_key, b"orphan".to_vec()).await.unwrap();

        let report = run(&ctx, false).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.deleted_keys, vec![orphan_key.to_string()]);
        assert_eq!(report.retained, 1);

        let kept_key = manifest::object_key_for_path(&kept.to_string_lossy());
        assert!(ctx.store.get(&kept_key).await.is_ok());
    }

    #[tokio::test]
    async fn gc_dry_run_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::write(source.join("a.txt"), b"hi").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let orphan_key = "0000000000000000000000000000000000000000000000000000000000aa.enc";
        ctx.store.put(orphan_key, b"orphan".to_vec()).await.unwrap();

        let report = run(&ctx, true).await.unwrap();
        assert_eq!(report.candidate_deletes, 1);
        assert_eq!(report.deleted_keys.len(), 0);
        assert!(ctx.store.get(orphan_key).await.is_ok());
    }
}
