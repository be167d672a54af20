//! End-to-end lifecycle scenarios from the spec's testable-properties list:
//! a full backup/restore round trip, and restoring a path after it has been
//! deleted from the live tree but is still reachable from an older snapshot.

use std::sync::Arc;

use baxter_core::config::Config;
use baxter_core::engine::{self, EngineContext};
use baxter_core::manifest::Manifest;
use baxter_core::objectstore::LocalObjectStore;
use baxter_core::paths::StatePaths;

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
async fn backup_then_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("src");
    tokio::fs::create_dir_all(&source).await.unwrap();
    let doc = source.join("doc.txt");
    let payload = b"baxter once integration test payload";
    tokio::fs::write(&doc, payload).await.unwrap();

    let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
    let report = engine::backup::run(&ctx).await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.uploaded, 1);

    let manifest = Manifest::load(&ctx.paths.manifest_path()).unwrap();
    assert_eq!(manifest.entries.len(), 1);
    let snapshots = baxter_core::manifest::snapshot_list(&ctx.paths.snapshots_dir()).unwrap();
    assert!(!snapshots.is_empty());
    let objects = ctx.store.list().await.unwrap();
    assert_eq!(objects.len(), 1);

    let restored_root = dir.path().join("restored");
    tokio::fs::create_dir_all(&restored_root).await.unwrap();
    let restore_report = engine::restore::run(
        &ctx,
        "latest",
        &doc.to_string_lossy(),
        Some(&restored_root),
        false,
        false,
        false,
    )
    .await
    .unwrap();
    assert!(restore_report.written);

    let restored_path = restored_root.join(doc.to_string_lossy().trim_start_matches('/'));
    let content = tokio::fs::read(&restored_path).await.unwrap();
    assert_eq!(content, payload);
}

#[tokio::test]
async fn restore_after_deletion_uses_the_oldest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("src");
    tokio::fs::create_dir_all(&source).await.unwrap();
    let doc = source.join("doc.txt");
    tokio::fs::write(&doc, b"still here").await.unwrap();

    let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
    engine::backup::run(&ctx).await.unwrap();
    let oldest = baxter_core::manifest::snapshot_list(&ctx.paths.snapshots_dir())
        .unwrap()
        .into_iter()
        .min_by_key(|s| s.created_at)
        .unwrap();

    tokio::fs::remove_file(&doc).await.unwrap();
    let report = engine::backup::run(&ctx).await.unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.removed, 1);

    let latest = Manifest::load(&ctx.paths.manifest_path()).unwrap();
    assert!(latest.entries.is_empty());

    // The object itself is still in the store; only gc would reclaim it.
    let key = baxter_core::manifest::object_key_for_path(&doc.to_string_lossy());
    assert!(ctx.store.get(&key).await.is_ok());

    let restored = engine::restore::run(
        &ctx,
        &oldest.id,
        &doc.to_string_lossy(),
        Some(&dir.path().join("restored-from-snapshot")),
        false,
        false,
        false,
    )
    .await
    .unwrap();
    assert!(restored.written);

    let err = engine::restore::run(&ctx, "latest", &doc.to_string_lossy(), None, false, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, baxter_core::Error::PathLookupFailed));
}
