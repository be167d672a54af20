//! Verify: re-fetch stored objects, decrypt them, and confirm their content
//! still matches the manifest's recorded hash.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::crypto;
use crate::manifest::{self, Manifest};

use super::EngineContext;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyMismatch {
    pub path: String,
    pub expected_sha256: String,
    pub actual_sha256: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct VerifyReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checked: usize,
    pub ok: usize,
    pub missing: usize,
    pub read_errors: usize,
    pub decrypt_errors: usize,
    pub checksum_errors: usize,
    pub mismatches: Vec<VerifyMismatch>,
    pub errors: Vec<String>,
}

impl VerifyReport {
    pub fn has_failures(&self) -> bool {
        self.missing + self.read_errors + self.decrypt_errors + self.checksum_errors > 0
    }
}

/// Select which manifest entries to verify. `prefix` restricts by path
/// prefix. Sampling is applied first (to an evenly spaced, first-and-last
/// inclusive subset), then `limit` caps the sampled set, per §4.6.
fn select_entries<'a>(
    manifest: &'a Manifest,
    prefix: &str,
    limit: usize,
    sample: usize,
) -> Vec<&'a manifest::ManifestEntry> {
    let filtered: Vec<&manifest::ManifestEntry> = manifest
        .entries
        .iter()
        .filter(|e| prefix.is_empty() || e.path.starts_with(prefix))
        .collect();

    let mut sampled = if sample > 0 && sample < filtered.len() {
        sample_evenly(&filtered, sample)
    } else {
        filtered
    };

    if limit > 0 && sampled.len() > limit {
        sampled.truncate(limit);
    }

    sampled
}

/// Pick `k` indices out of `n` items, evenly spaced and inclusive of the
/// first and last: `round(i*(n-1)/(k-1))` for `i` in `[0, k)`, deduplicating
/// collisions by advancing to the next free index.
fn sample_evenly<'a>(
    items: &[&'a manifest::ManifestEntry],
    k: usize,
) -> Vec<&'a manifest::ManifestEntry> {
    let n = items.len();
    if k == 0 || n == 0 {
        return Vec::new();
    }
    if k == 1 {
        return vec![items[0]];
    }
    let mut seen = std::collections::HashSet::new();
    let mut indices = Vec::with_capacity(k);
    for i in 0..k {
        let raw = (i * (n - 1)) as f64 / (k - 1) as f64;
        let mut idx = raw.round() as usize;
        while seen.contains(&idx) && idx + 1 < n {
            idx += 1;
        }
        if seen.insert(idx) {
            indices.push(idx);
        }
    }
    indices.into_iter().map(|i| items[i]).collect()
}

pub async fn run(ctx: &EngineContext, selector: &str) -> Result<VerifyReport> {
    let started_at = Utc::now();
    let manifest = manifest::resolve_selector(&ctx.paths.manifest_path(), &ctx.paths.snapshots_dir(), selector)?;

    let targets = select_entries(
        &manifest,
        &ctx.config.verify.prefix,
        ctx.config.verify.limit,
        ctx.config.verify.sample,
    );
    info!(count = targets.len(), "starting verify");

    let mut report = VerifyReport {
        started_at,
        ..Default::default()
    };

    for entry in &targets {
        report.checked += 1;
        let key = manifest::object_key_for_path(&entry.path);
        let envelope = match ctx.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                report.missing += 1;
                report.errors.push(format!("{}: missing", entry.path));
                continue;
            }
            Err(e) => {
                report.read_errors += 1;
                report.errors.push(format!("{}: read error: {e}", entry.path));
                continue;
            }
        };

        let plaintext = match crypto::decrypt(&ctx.decrypt_candidates, &envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.decrypt_errors += 1;
                report.errors.push(format!("{}: decrypt failed: {e}", entry.path));
                continue;
            }
        };

        let actual = manifest::hash_bytes(&plaintext);
        if actual != entry.sha256 {
            warn!(path = %entry.path, "verify checksum mismatch");
            report.checksum_errors += 1;
            report.mismatches.push(VerifyMismatch {
                path: entry.path.clone(),
                expected_sha256: entry.sha256.clone(),
                actual_sha256: actual,
            });
            continue;
        }

        report.ok += 1;
    }

    report.finished_at = Utc::now();
    info!(
        checked = report.checked,
        ok = report.ok,
        missing = report.missing,
        read_errors = report.read_errors,
        decrypt_errors = report.decrypt_errors,
        checksum_errors = report.checksum_errors,
        "verify complete"
    );

    Ok(report)
}
