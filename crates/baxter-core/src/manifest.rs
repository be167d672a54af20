//! Manifest/snapshot model and the change-planning algorithm.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::clean_path_buf;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub modified: DateTime<Utc>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn find(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Atomic save via temp-file + rename, matching the KDF-salt and manifest
    /// write discipline described for state files.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent.to_path_buf(), e))?;
        }
        fs::write(&tmp, json).map_err(|e| Error::io(tmp.clone(), e))?;
        fs::rename(&tmp, path).map_err(|e| Error::io(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Load a manifest, or an empty one (with a fresh creation time) if the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::empty()),
            Err(e) => Err(Error::io(path.to_path_buf(), e)),
        }
    }
}

/// Walk `roots`, skipping excluded paths/globs, and build a manifest with
/// entries sorted ascending by path.
pub fn build(roots: &[String], exclude_paths: &[String], exclude_globs: &[String]) -> Result<Manifest> {
    let globs: Vec<glob::Pattern> = exclude_globs
        .iter()
        .filter_map(|g| glob::Pattern::new(g).ok())
        .collect();

    let mut entries = Vec::new();
    for root in roots {
        let root_path = PathBuf::from(root);
        if !root_path.exists() {
            continue;
        }
        for entry in WalkDir::new(&root_path).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let cleaned = clean_path_buf(entry.path());
            if is_excluded(&cleaned, exclude_paths, &globs) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            #[cfg(unix)]
            let mode = {
                use std::os::unix::fs::PermissionsExt;
                metadata.permissions().mode()
            };
            #[cfg(not(unix))]
            let mode: u32 = 0o644;

            let sha256 = match hash_file(&cleaned) {
                Ok(h) => h,
                Err(_) => continue,
            };

            entries.push(ManifestEntry {
                path: cleaned.to_string_lossy().into_owned(),
                size: metadata.len(),
                mode,
                modified,
                sha256,
            });
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(Manifest {
        created_at: Utc::now(),
        entries,
    })
}

fn is_excluded(path: &Path, exclude_paths: &[String], globs: &[glob::Pattern]) -> bool {
    for excluded in exclude_paths {
        let excluded_path = Path::new(excluded);
        if path == excluded_path || path.starts_with(excluded_path) {
            return true;
        }
    }
    let slashed = path.to_string_lossy().replace('\\', "/");
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    globs
        .iter()
        .any(|g| g.matches(&basename) || g.matches(&slashed))
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash raw bytes directly (used by restore/verify to re-check content).
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// The deterministic object-store key for a cleaned path.
pub fn object_key_for_path(path: &str) -> String {
    format!("{}.enc", hex::encode(Sha256::digest(path.as_bytes())))
}

pub struct Plan {
    pub new_or_changed: Vec<ManifestEntry>,
    pub removed_paths: Vec<String>,
}

/// Compute `(new_or_changed, removed_paths)` between two manifests.
pub fn plan(prev: &Manifest, curr: &Manifest) -> Plan {
    let mut new_or_changed = Vec::new();
    for entry in &curr.entries {
        match prev.find(&entry.path) {
            Some(prev_entry) if prev_entry.size == entry.size && prev_entry.sha256 == entry.sha256 => {}
            _ => new_or_changed.push(entry.clone()),
        }
    }
    new_or_changed.sort_by(|a, b| a.path.cmp(&b.path));

    let curr_paths: HashSet<&str> = curr.entries.iter().map(|e| e.path.as_str()).collect();
    let mut removed_paths: Vec<String> = prev
        .entries
        .iter()
        .filter(|e| !curr_paths.contains(e.path.as_str()))
        .map(|e| e.path.clone())
        .collect();
    removed_paths.sort();

    Plan {
        new_or_changed,
        removed_paths,
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
}

/// Save a frozen copy of `manifest` into `dir`, disambiguating the id on
/// collision with `-1`, `-2`, ...
pub fn snapshot_save(dir: &Path, manifest: &Manifest) -> Result<SnapshotRecord> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir.to_path_buf(), e))?;
    let base_id = manifest.created_at.format("%Y%m%dT%H%M%S%.9fZ").to_string();
    let mut id = base_id.clone();
    let mut path = dir.join(format!("{id}.json"));
    let mut suffix = 0;
    while path.exists() {
        suffix += 1;
        id = format!("{base_id}-{suffix}");
        path = dir.join(format!("{id}.json"));
    }
    manifest.save(&path)?;
    Ok(SnapshotRecord {
        id,
        path,
        created_at: manifest.created_at,
        entry_count: manifest.entries.len(),
    })
}

/// List all snapshots in `dir`, newest-first (tie-break by id descending).
pub fn snapshot_list(dir: &Path) -> Result<Vec<SnapshotRecord>> {
    let mut out = Vec::new();
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(Error::io(dir.to_path_buf(), e)),
    };
    for entry in read_dir {
        let entry = entry.map_err(|e| Error::io(dir.to_path_buf(), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manifest = Manifest::load(&path)?;
        out.push(SnapshotRecord {
            id,
            path,
            created_at: manifest.created_at,
            entry_count: manifest.entries.len(),
        });
    }
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(out)
}

/// Keep the newest `retain` snapshots, deleting the rest. `retain == 0` means
/// no pruning.
pub fn snapshot_prune(dir: &Path, retain: u32) -> Result<usize> {
    if retain == 0 {
        return Ok(0);
    }
    let all = snapshot_list(dir)?;
    let retain = retain as usize;
    if all.len() <= retain {
        return Ok(0);
    }
    let mut removed = 0;
    for record in &all[retain..] {
        fs::remove_file(&record.path).map_err(|e| Error::io(record.path.clone(), e))?;
        removed += 1;
    }
    Ok(removed)
}

/// Resolve a selector string (empty/"latest", an RFC 3339 timestamp, or a
/// literal snapshot id) to a manifest.
pub fn resolve_selector(manifest_path: &Path, snapshots_dir: &Path, selector: &str) -> Result<Manifest> {
    if selector.is_empty() || selector == "latest" {
        return Manifest::load(manifest_path);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(selector) {
        let ts = ts.with_timezone(&Utc);
        let snapshots = snapshot_list(snapshots_dir)?;
        let found = snapshots
            .into_iter()
            .filter(|s| s.created_at <= ts)
            .max_by_key(|s| s.created_at);
        return match found {
            Some(record) => Manifest::load(&record.path),
            None => Err(Error::SnapshotNotFound(selector.to_string())),
        };
    }
    let snapshots = snapshot_list(snapshots_dir)?;
    match snapshots.into_iter().find(|s| s.id == selector) {
        Some(record) => Manifest::load(&record.path),
        None => Err(Error::SnapshotNotFound(selector.to_string())),
    }
}
