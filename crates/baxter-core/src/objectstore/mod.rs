//! Content-addressed object storage abstraction, with local-filesystem and
//! remote-bucket backends.

pub mod local;
pub mod remote;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use local::LocalObjectStore;
pub use remote::RemoteObjectStore;

/// Validate an object key: no leading slash, no empty segments, no `.`/`..`
/// segments.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(Error::InvalidKey(key.to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

/// Uniform interface over where encrypted objects physically live.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_leading_slash() {
        assert!(validate_key("/abc.enc").is_err());
    }

    #[test]
    fn rejects_dot_segments() {
        assert!(validate_key("a/../b.enc").is_err());
        assert!(validate_key("a/./b.enc").is_err());
        assert!(validate_key("a//b.enc").is_err());
    }

    #[test]
    fn accepts_plain_key() {
        assert!(validate_key("ab/cd/abcdef.enc").is_ok());
        assert!(validate_key("abcdef0123.enc").is_ok());
    }
}
