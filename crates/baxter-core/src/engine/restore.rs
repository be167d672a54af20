//! Restore: resolve a manifest entry via a selector, decrypt and re-verify
//! it, and write it back to disk under an overwrite policy.
//!
//! Two invariants are enforced unconditionally: a restore target must
//! resolve inside the destination root, and a checksum mismatch between the
//! decrypted bytes and the manifest's recorded hash aborts the restore
//! *before* anything is written — the existing target file, if any, is never
//! touched.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::clean_path_buf;
use crate::crypto;
use crate::error::{Error, Result};
use crate::manifest::{self, Manifest, ManifestEntry};

use super::EngineContext;

/// List manifest entries matching `prefix` (by path prefix) and `contains`
/// (by substring), for the `restore/list` control-plane endpoint and the
/// `restore list` CLI subcommand.
pub fn list<'a>(manifest: &'a Manifest, prefix: &str, contains: &str) -> Vec<&'a ManifestEntry> {
    manifest
        .entries
        .iter()
        .filter(|e| prefix.is_empty() || e.path.starts_with(prefix))
        .filter(|e| contains.is_empty() || e.path.contains(contains))
        .collect()
}

/// Find the manifest entry for `requested_path`: an exact cleaned-path
/// match, falling back to the absolute form of the requested path.
fn find_entry<'a>(manifest: &'a Manifest, requested_path: &str) -> Option<&'a ManifestEntry> {
    let cleaned = clean_path_buf(Path::new(requested_path));
    let cleaned_str = cleaned.to_string_lossy();
    if let Some(entry) = manifest.find(&cleaned_str) {
        return Some(entry);
    }
    if !cleaned.is_absolute() {
        let absolute = std::env::current_dir()
            .map(|cwd| clean_path_buf(&cwd.join(&cleaned)))
            .unwrap_or(cleaned);
        if let Some(entry) = manifest.find(&absolute.to_string_lossy()) {
            return Some(entry);
        }
    }
    None
}

/// Compute the on-disk restore target: the entry's own path when no
/// destination root is given, or `destRoot / relative(entry.path)`
/// otherwise. Rejects any result that would land outside `destRoot`.
fn resolve_target(entry: &ManifestEntry, destination_root: Option<&Path>) -> Result<PathBuf> {
    let Some(root) = destination_root else {
        return Ok(PathBuf::from(&entry.path));
    };
    let root = clean_path_buf(root);
    let relative = entry.path.trim_start_matches(['/', '\\']);
    let joined = clean_path_buf(&root.join(relative));

    let rel_to_root = joined
        .strip_prefix(&root)
        .map_err(|_| Error::InvalidRestoreTarget)?;
    if rel_to_root == Path::new("..") || rel_to_root.starts_with("..") {
        return Err(Error::InvalidRestoreTarget);
    }
    Ok(joined)
}

#[derive(Debug, Clone, Serialize)]
pub struct RestorePlan {
    pub source_path: String,
    pub target_path: String,
    pub snapshot_selector: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub plan: RestorePlan,
    pub verified: bool,
    pub written: bool,
}

/// Resolve `source_path` against the manifest named by `selector` and
/// compute its restore plan, without touching the filesystem target.
pub fn plan(
    ctx: &EngineContext,
    selector: &str,
    source_path: &str,
    destination_root: Option<&Path>,
) -> Result<(Manifest, ManifestEntry, RestorePlan)> {
    let manifest = manifest::resolve_selector(&ctx.paths.manifest_path(), &ctx.paths.snapshots_dir(), selector)?;
    let entry = find_entry(&manifest, source_path).ok_or(Error::PathLookupFailed)?.clone();
    let target = resolve_target(&entry, destination_root)?;

    let rendered_selector = if selector.is_empty() { "latest" } else { selector };
    let restore_plan = RestorePlan {
        source_path: entry.path.clone(),
        target_path: target.to_string_lossy().into_owned(),
        snapshot_selector: rendered_selector.to_string(),
        size: entry.size,
        sha256: entry.sha256.clone(),
    };
    Ok((manifest, entry, restore_plan))
}

/// Run a restore. `dry_run` stops after planning; `verify_only` fetches and
/// checksums the object but never writes; otherwise the plaintext is written
/// to the resolved target, subject to `overwrite`.
pub async fn run(
    ctx: &EngineContext,
    selector: &str,
    source_path: &str,
    destination_root: Option<&Path>,
    overwrite: bool,
    dry_run: bool,
    verify_only: bool,
) -> Result<RestoreReport> {
    let (_, entry, restore_plan) = plan(ctx, selector, source_path, destination_root)?;

    if dry_run {
        return Ok(RestoreReport {
            plan: restore_plan,
            verified: false,
            written: false,
        });
    }

    let key = manifest::object_key_for_path(&entry.path);
    let envelope = ctx.store.get(&key).await?;
    let plaintext = crypto::decrypt(&ctx.decrypt_candidates, &envelope)?;
    let actual = manifest::hash_bytes(&plaintext);
    if actual != entry.sha256 {
        return Err(Error::IntegrityCheckFailed);
    }

    if verify_only {
        return Ok(RestoreReport {
            plan: restore_plan,
            verified: true,
            written: false,
        });
    }

    let target = PathBuf::from(&restore_plan.target_path);
    if target.exists() && !overwrite {
        return Err(Error::TargetExists);
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent.to_path_buf(), e))?;
    }
    tokio::fs::write(&target, &plaintext)
        .await
        .map_err(|e| Error::io(target.clone(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = entry.mode & 0o777;
        let perms = std::fs::Permissions::from_mode(mode);
        tokio::fs::set_permissions(&target, perms)
            .await
            .map_err(|e| Error::io(target.clone(), e))?;
    }

    Ok(RestoreReport {
        plan: restore_plan,
        verified: true,
        written: true,
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
    async fn restore_writes_original_content_under_destination_root() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let file = source.join("doc.txt");
        tokio::fs::write(&file, b"baxter once integration test payload").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let dest = dir.path().join("restored");
        tokio::fs::create_dir_all(&dest).await.unwrap();
        let report = run(&ctx, "latest", &file.to_string_lossy(), Some(&dest), false, false, false)
            .await
            .unwrap();
        assert!(report.written);

        let restored_path = dest.join(file.to_string_lossy().trim_start_matches('/'));
        let content = tokio::fs::read(&restored_path).await.unwrap();
        assert_eq!(content, b"baxter once integration test payload");
    }

    #[tokio::test]
    async fn restore_without_destination_root_writes_to_original_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let file = source.join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();
        tokio::fs::remove_file(&file).await.unwrap();

        let report = run(&ctx, "latest", &file.to_string_lossy(), None, true, false, false)
            .await
            .unwrap();
        assert!(report.written);
        assert_eq!(tokio::fs::read(&file).await.unwrap(), b"hello");
    }

    #[test]
    fn resolve_target_rejects_escape_from_destination_root() {
        let escaping = ManifestEntry {
            path: "../../etc/passwd".to_string(),
            size: 0,
            mode: 0,
            modified: chrono::Utc::now(),
            sha256: String::new(),
        };
        let dest = Path::new("/tmp/baxter-restore-dest");
        assert!(resolve_target(&escaping, Some(dest)).is_err());
    }

    #[tokio::test]
    async fn restore_rejects_existing_target_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let file = source.join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let dest = dir.path().join("restored");
        let restored_path = dest.join(file.to_string_lossy().trim_start_matches('/'));
        tokio::fs::create_dir_all(restored_path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&restored_path, b"already here").await.unwrap();

        let err = run(&ctx, "latest", &file.to_string_lossy(), Some(&dest), false, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TargetExists));
        assert_eq!(tokio::fs::read(&restored_path).await.unwrap(), b"already here");
    }

    #[tokio::test]
    async fn restore_never_touches_target_on_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let file = source.join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let key = manifest::object_key_for_path(&file.to_string_lossy());
        let mut envelope = ctx.store.get(&key).await.unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xff;
        ctx.store.put(&key, envelope).await.unwrap();

        let dest = dir.path().join("restored");
        let err = run(&ctx, "latest", &file.to_string_lossy(), Some(&dest), false, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IntegrityCheckFailed));

        let restored_path = dest.join(file.to_string_lossy().trim_start_matches('/'));
        assert!(!restored_path.exists());
    }

    #[tokio::test]
    async fn dry_run_does_not_touch_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let file = source.join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let dest = dir.path().join("restored");
        let report = run(&ctx, "latest", &file.to_string_lossy(), Some(&dest), false, true, false)
            .await
            .unwrap();
        assert!(!report.written);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn verify_only_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(&source).await.unwrap();
        let file = source.join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let ctx = context(dir.path(), vec![source.to_string_lossy().into_owned()]).await;
        super::super::backup::run(&ctx).await.unwrap();

        let dest = dir.path().join("restored");
        let report = run(&ctx, "latest", &file.to_string_lossy(), Some(&dest), false, false, true)
            .await
            .unwrap();
        assert!(report.verified);
        assert!(!report.written);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_path_signals_path_lookup_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), vec![]).await;
        let err = run(&ctx, "latest", "/no/such/file", None, false, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PathLookupFailed));
    }
}
