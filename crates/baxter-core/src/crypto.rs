//! Versioned AEAD envelope, key derivation, and opportunistic compression.
//!
//! Envelope layout: `version(1) || compression(1) || nonce(12) || ciphertext`.
//! Version 3 is written; versions 2 and 3 are both accepted on read (the
//! legacy v2 layout carries no compression byte — see [`decrypt`]).

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Argon2, Params};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 64 * 1024; // KiB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;

/// Secondary salt recognized for decrypt-time key migration only; never used
/// to derive the primary encryption key.
pub const LEGACY_SALT: &[u8] = b"baxter/argon2id/v1";

const CURRENT_VERSION: u8 = 3;
const LEGACY_VERSION: u8 = 2;
const NONCE_LEN: usize = 12;
const COMPRESSION_NONE: u8 = 0;
const COMPRESSION_GZIP: u8 = 1;

pub type Key32 = Zeroizing<[u8; DERIVED_KEY_LEN]>;

/// Derive the AES-256 key from a passphrase and salt via Argon2id.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Key32> {
    let params = Params::new(KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM, Some(DERIVED_KEY_LEN))
        .map_err(|e| Error::Config(format!("argon2 params: {e}")))?;
    let argon = Argon2::from(params);
    let mut out = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, out.as_mut_slice())
        .map_err(|e| Error::Config(format!("argon2 derive: {e}")))?;
    Ok(out)
}

/// Candidate keys to attempt on decrypt: primary salt first, legacy salt
/// second. Encrypt always uses the primary key (index 0).
pub fn candidate_keys(passphrase: &str, primary_salt: &[u8]) -> Result<Vec<Key32>> {
    Ok(vec![
        derive_key(passphrase, primary_salt)?,
        derive_key(passphrase, LEGACY_SALT)?,
    ])
}

fn gzip_compress(plaintext: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plaintext)?;
    encoder.finish()
}

fn gzip_decompress(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Encrypt `plaintext` under `key`, producing a version-3 envelope.
pub fn encrypt(key: &Key32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let compressed = gzip_compress(plaintext).ok();
    let (compression, body): (u8, &[u8]) = match &compressed {
        Some(c) if c.len() < plaintext.len() => (COMPRESSION_GZIP, c.as_slice()),
        _ => (COMPRESSION_NONE, plaintext),
    };

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, body)
        .map_err(|_| Error::DecryptFailed)?;

    let mut out = Vec::with_capacity(2 + NONCE_LEN + ciphertext.len());
    out.push(CURRENT_VERSION);
    out.push(compression);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a v2 or v3 envelope, trying each candidate key in order.
pub fn decrypt(candidates: &[Key32], payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < 14 {
        return Err(Error::InvalidEnvelope("payload too short".into()));
    }
    let version = payload[0];

    let (compression, nonce_bytes, ciphertext): (u8, &[u8], &[u8]) = match version {
        LEGACY_VERSION => {
            let nonce = &payload[1..1 + NONCE_LEN];
            let ciphertext = &payload[1 + NONCE_LEN..];
            (COMPRESSION_NONE, nonce, ciphertext)
        }
        CURRENT_VERSION => {
            let compression = payload[1];
            if compression != COMPRESSION_NONE && compression != COMPRESSION_GZIP {
                return Err(Error::InvalidEnvelope(format!(
                    "unknown compression byte {compression}"
                )));
            }
            let nonce = &payload[2..2 + NONCE_LEN];
            let ciphertext = &payload[2 + NONCE_LEN..];
            (compression, nonce, ciphertext)
        }
        other => {
            return Err(Error::InvalidEnvelope(format!("unsupported version {other}")));
        }
    };

    let nonce = Nonce::from_slice(nonce_bytes);
    let mut last_err = Error::DecryptFailed;
    for key in candidates {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        match cipher.decrypt(nonce, ciphertext) {
            Ok(body) => {
                return if compression == COMPRESSION_GZIP {
                    gzip_decompress(&body).map_err(|_| Error::DecryptFailed)
                } else {
                    Ok(body)
                };
            }
            Err(_) => last_err = Error::DecryptFailed,
        }
    }
    Err(last_err)
}

/// Generate a fresh 16-byte KDF salt.
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Load the persisted KDF salt, creating it via temp-file + rename if absent.
pub fn load_or_create_salt(path: &std::path::Path) -> Result<[u8; 16]> {
    if let Ok(bytes) = std::fs::read(path) {
        if bytes.len() == 16 {
            let mut salt = [0u8; 16];
            salt.copy_from_slice(&bytes);
            return Ok(salt);
        }
        return Err(Error::Config(format!(
            "kdf salt at {} has unexpected length {}",
            path.display(),
            bytes.len()
        )));
    }
    let salt = generate_salt();
    let tmp_path = path.with_extension("bin.tmp");
    std::fs::write(&tmp_path, salt).map_err(|e| Error::io(tmp_path.clone(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| Error::io(path.to_path_buf(), e))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<Key32> {
        vec![derive_key("test-passphrase", b"0123456789abcdef").unwrap()]
    }

    #[test]
    fn round_trip() {
        let key = keys();
        let plaintext = b"baxter once integration test payload";
        let envelope = encrypt(&key[0], plaintext).unwrap();
        let out = decrypt(&key, &envelope).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn tamper_breaks_decrypt() {
        let key = keys();
        let mut envelope = encrypt(&key[0], b"hello world").unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xff;
        assert!(decrypt(&key, &envelope).is_err());
    }

    #[test]
    fn legacy_v2_accepted() {
        let key = derive_key("test-passphrase", b"0123456789abcdef").unwrap();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let nonce_bytes = [7u8; NONCE_LEN];
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher.encrypt(nonce, b"legacy body".as_slice()).unwrap();
        let mut envelope = vec![LEGACY_VERSION];
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        let out = decrypt(&[key], &envelope).unwrap();
        assert_eq!(out, b"legacy body");
    }

    #[test]
    fn v1_rejected() {
        let key = keys();
        let envelope = vec![1u8; 20];
        assert!(decrypt(&key, &envelope).is_err());
    }

    #[test]
    fn unknown_compression_byte_rejected() {
        let key = keys();
        let mut envelope = encrypt(&key[0], b"hi").unwrap();
        envelope[1] = 9;
        assert!(decrypt(&key, &envelope).is_err());
    }

    #[test]
    fn compresses_when_smaller() {
        let key = keys();
        let plaintext = vec![b'a'; 4096];
        let envelope = encrypt(&key[0], &plaintext).unwrap();
        assert_eq!(envelope[1], COMPRESSION_GZIP);
        assert_eq!(decrypt(&key, &envelope).unwrap(), plaintext);
    }
}
