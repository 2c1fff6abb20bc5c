//! AES-256-GCM encryption of embeddings at rest.
//!
//! Sealed layout: 12-byte random nonce followed by the ciphertext and tag.
//! The cipher key is the SHA-256 of a key file holding at least 32 random
//! bytes, created with mode 0600 on first use.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

const NONCE_LEN: usize = 12;
const KEY_FILE_LEN: usize = 32;

#[derive(Clone)]
pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
}

impl EmbeddingCipher {
    /// Derive the cipher key from arbitrary key material.
    pub fn from_key_material(material: &[u8]) -> Self {
        let digest = Sha256::digest(material);
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Read the key file, creating it with fresh random bytes if missing.
    pub fn load_or_create(path: &Path) -> Result<Self, StoreError> {
        let key_file_err = |source| StoreError::KeyFile {
            path: path.display().to_string(),
            source,
        };

        if path.exists() {
            let material = fs::read(path).map_err(key_file_err)?;
            if material.len() < KEY_FILE_LEN {
                return Err(StoreError::InvalidKey(path.display().to_string()));
            }
            tracing::debug!(path = %path.display(), "loaded embedding key");
            return Ok(Self::from_key_material(&material));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(key_file_err)?;
        }
        let mut material = [0u8; KEY_FILE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut material);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(key_file_err)?;
        file.write_all(&material).map_err(key_file_err)?;

        tracing::info!(path = %path.display(), "created embedding key");
        Ok(Self::from_key_material(&material))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| StoreError::Seal)?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Unseal);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Unseal)
    }
}
