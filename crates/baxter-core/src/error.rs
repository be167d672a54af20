use std::path::PathBuf;

use thiserror::Error;

/// Library-level error type for every fallible operation in `baxter-core`.
///
/// Binaries wrap these in `anyhow` for call-site context; the HTTP layer maps
/// variants to the stable `code` taxonomy via [`Error::code`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("decrypt failed")]
    DecryptFailed,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("manifest load failed: {0}")]
    ManifestLoadFailed(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("path lookup failed")]
    PathLookupFailed,

    #[error("invalid restore target")]
    InvalidRestoreTarget,

    #[error("target exists")]
    TargetExists,

    #[error("integrity check failed")]
    IntegrityCheckFailed,

    #[error("backup already running")]
    BackupRunning,

    #[error("verify already running")]
    VerifyRunning,

    #[error("{0}")]
    Serde(#[from] serde_json::Error),

    #[error("passphrase unavailable: {0}")]
    Passphrase(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable HTTP error code per the control-plane error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io { .. } => "io_error",
            Error::Config(_) => "invalid_request",
            Error::InvalidEnvelope(_) | Error::DecryptFailed => "decrypt_failed",
            Error::NotFound(_) => "read_object_failed",
            Error::InvalidKey(_) => "invalid_request",
            Error::Store(_) => "read_object_failed",
            Error::ManifestLoadFailed(_) => "manifest_load_failed",
            Error::SnapshotNotFound(_) => "snapshot_list_failed",
            Error::PathLookupFailed => "path_lookup_failed",
            Error::InvalidRestoreTarget => "invalid_restore_target",
            Error::TargetExists => "target_exists",
            Error::IntegrityCheckFailed => "integrity_check_failed",
            Error::BackupRunning => "backup_running",
            Error::VerifyRunning => "verify_running",
            Error::Serde(_) => "invalid_request",
            Error::Passphrase(_) => "invalid_request",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
