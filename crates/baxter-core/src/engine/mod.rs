//! Backup, verify, garbage-collection, and restore operations, shared by the
//! daemon and the one-shot CLI.

pub mod backup;
pub mod gc;
pub mod restore;
pub mod verify;

use std::sync::Arc;

use crate::config::Config;
use crate::crypto::{self, Key32};
use crate::error::Result;
use crate::objectstore::ObjectStore;
use crate::paths::StatePaths;

/// Everything an engine operation needs: where state lives, what the user
/// configured, where objects are stored, and the encryption keys.
pub struct EngineContext {
    pub paths: StatePaths,
    pub config: Config,
    pub store: Arc<dyn ObjectStore>,
    pub encrypt_key: Key32,
    pub decrypt_candidates: Vec<Key32>,
}

impl EngineContext {
    pub fn new(paths: StatePaths, config: Config, store: Arc<dyn ObjectStore>, passphrase: &str) -> Result<Self> {
        let salt = crypto::load_or_create_salt(&paths.kdf_salt_path())?;
        let encrypt_key = crypto::derive_key(passphrase, &salt)?;
        let decrypt_candidates = crypto::candidate_keys(passphrase, &salt)?;
        Ok(Self {
            paths,
            config,
            store,
            encrypt_key,
            decrypt_candidates,
        })
    }
}
