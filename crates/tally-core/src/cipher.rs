//! Chunked RSA-OAEP (SHA-256) encryption for payloads in transit.
//!
//! A payload longer than one RSA block is split into chunks of
//! `key_size - 2 * 32 - 2` bytes; each chunk is encrypted on its own and the
//! ciphertexts are concatenated. Decryption walks the ciphertext in blocks of
//! exactly `key_size` bytes.

use crate::CipherError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::{Path, PathBuf};

/// SHA-256 output size in bytes
const HASH_SIZE: usize = 32;

/// Smallest key accepted for encryption by default
pub const DEFAULT_MIN_KEY_BITS: usize = 1024;

/// Encrypts payloads with a public key
#[derive(Debug, Clone)]
pub struct Encrypter {
    key: RsaPublicKey,
    min_key_bits: usize,
}

impl Encrypter {
    pub fn new(key: RsaPublicKey) -> Self {
        Self {
            key,
            min_key_bits: DEFAULT_MIN_KEY_BITS,
        }
    }

    /// Override the minimum key size
    pub fn with_min_key_bits(mut self, bits: usize) -> Self {
        self.min_key_bits = bits;
        self
    }

    /// Load a PEM public key (SPKI `PUBLIC KEY` or PKCS#1 `RSA PUBLIC KEY`)
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self, CipherError> {
        let path = path.as_ref();
        let pem = read_pem(path)?;
        let key = RsaPublicKey::from_public_key_pem(&pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
            .map_err(|e| CipherError::Key {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Self::new(key))
    }

    /// Plaintext bytes carried by one encrypted block
    pub fn chunk_size(&self) -> usize {
        self.key.size().saturating_sub(2 * HASH_SIZE + 2)
    }

    /// Encrypt an arbitrary-length payload
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key_bits = self.key.size() * 8;
        let step = self.chunk_size();
        if key_bits < self.min_key_bits || step == 0 {
            return Err(CipherError::MessageTooLarge {
                key_bits,
                min_bits: self.min_key_bits,
            });
        }

        let blocks = plaintext.len().div_ceil(step);
        let mut out = Vec::with_capacity(blocks * self.key.size());
        let mut rng = OsRng;
        for chunk in plaintext.chunks(step) {
            let block = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                .map_err(|e| CipherError::Encryption(e.to_string()))?;
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

/// Decrypts payloads with a private key
#[derive(Debug, Clone)]
pub struct Decrypter {
    key: RsaPrivateKey,
}

impl Decrypter {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Load a PEM private key (PKCS#1 `RSA PRIVATE KEY` or PKCS#8 `PRIVATE KEY`)
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self, CipherError> {
        let path = path.as_ref();
        let pem = read_pem(path)?;
        let key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
            .map_err(|e| CipherError::Key {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Self::new(key))
    }

    /// Matching public key
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Decrypt a payload produced by [`Encrypter::encrypt`].
    ///
    /// Fails as a whole if any block is malformed; no partial plaintext is
    /// ever returned.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let block = self.key.size();
        if ciphertext.len() % block != 0 {
            return Err(CipherError::Decryption(format!(
                "ciphertext length {} is not a multiple of the {}-byte key size",
                ciphertext.len(),
                block
            )));
        }

        let mut out = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let plain = self
                .key
                .decrypt(Oaep::new::<Sha256>(), chunk)
                .map_err(|e| CipherError::Decryption(e.to_string()))?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

fn read_pem(path: &Path) -> Result<String, CipherError> {
    std::fs::read_to_string(path).map_err(|source| CipherError::Io {
        path: PathBuf::from(path),
        source,
    })
}
