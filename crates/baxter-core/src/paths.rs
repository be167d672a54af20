//! Per-user application directory resolution.
//!
//! All state — configuration, manifest, snapshots, local objects, and the KDF
//! salt — lives under one directory resolved by [`directories::ProjectDirs`].
//! An environment override is honored for tests and containerized deployments
//! that don't want to touch the real user profile.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{Error, Result};

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "baxter";
const APP_NAME: &str = "baxter";

const STATE_DIR_ENV: &str = "BAXTER_STATE_DIR";

#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Resolve the state root, honoring `BAXTER_STATE_DIR` before falling
    /// back to the platform-conventional per-user application directory.
    pub fn resolve() -> Result<Self> {
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            return Ok(Self {
                root: PathBuf::from(dir),
            });
        }
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .ok_or_else(|| Error::Config("could not resolve application directory".into()))?;
        Ok(Self {
            root: dirs.data_dir().to_path_buf(),
        })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn kdf_salt_path(&self) -> PathBuf {
        self.root.join("kdf_salt.bin")
    }

    /// Create every directory this layout requires, idempotently.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.root, &self.snapshots_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| Error::io(dir.clone(), e))?;
        }
        Ok(())
    }
}
