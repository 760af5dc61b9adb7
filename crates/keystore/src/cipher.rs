use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{KeyStoreError, Result};

pub const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing for key slots at rest.
///
/// The cipher key is the SHA-256 digest of the configured key material.
pub struct SlotCipher {
    key: Zeroizing<[u8; 32]>,
}

impl SlotCipher {
    pub fn new(material: &[u8]) -> Self {
        let digest = Sha256::digest(material);
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&digest);
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| KeyStoreError::Encryption(format!("Failed to create cipher: {}", e)))
    }

    /// Encrypt under a fresh random nonce. Returns `(ciphertext, nonce)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| KeyStoreError::Encryption(format!("Encryption failed: {}", e)))?;
        Ok((ciphertext, nonce))
    }

    pub fn open(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Zeroizing<Vec<u8>>> {
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| KeyStoreError::Encryption(format!("Decryption failed: {}", e)))
    }
}
