//! Value encryption using AES-GCM.
//!
//! String and blob entries may be stored encrypted. The manager holds at
//! most one key; encrypted entries are decrypted transparently on read.
//!
//! ## Ciphertext layout
//!
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//!
//! The entry key is bound as associated data, so a ciphertext copied under
//! another key name fails authentication. The namespace is not bound, which
//! lets an exported namespace be imported under a different name.
//!
//! ## Security Model
//!
//! - AES-128-GCM or AES-256-GCM authenticated encryption
//! - Random nonce per encryption
//! - Key bytes are zeroized on drop and redacted from `Debug`

use crate::error::{ConfigError, ConfigResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Bytes added to every plaintext by encryption.
pub const CIPHERTEXT_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Supported cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    /// AES-128 in GCM mode (16-byte key).
    Aes128Gcm,
    /// AES-256 in GCM mode (32-byte key).
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// Key size in bytes.
    #[must_use]
    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm => 32,
        }
    }
}

/// Key material for value encryption.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    algorithm: CipherAlgorithm,
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] if the length does not
    /// match the algorithm's key size.
    pub fn from_bytes(bytes: &[u8], algorithm: CipherAlgorithm) -> ConfigResult<Self> {
        if bytes.len() != algorithm.key_size() {
            return Err(ConfigError::invalid_parameter(format!(
                "invalid key size for {algorithm:?}: expected {} bytes, got {}",
                algorithm.key_size(),
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            algorithm,
        })
    }

    /// Generates a new random key.
    #[must_use]
    pub fn generate(algorithm: CipherAlgorithm) -> Self {
        let mut bytes = vec![0u8; algorithm.key_size()];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes, algorithm }
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// HKDF is a key derivation function, not a password hash; the
    /// passphrase should already carry high entropy (for example a
    /// per-device secret).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] for an empty passphrase
    /// and [`ConfigError::CryptoFailure`] if expansion fails.
    pub fn derive_from_passphrase(
        passphrase: &[u8],
        salt: &[u8],
        algorithm: CipherAlgorithm,
    ) -> ConfigResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        if passphrase.is_empty() {
            return Err(ConfigError::invalid_parameter("passphrase must not be empty"));
        }

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = vec![0u8; algorithm.key_size()];
        hk.expand(b"confstore-value-key-v1", &mut bytes)
            .map_err(|_| ConfigError::crypto_failure("HKDF expand failed"))?;
        Ok(Self { bytes, algorithm })
    }

    /// Returns the algorithm this key is for.
    #[must_use]
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Returns the raw key bytes.
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("algorithm", &self.algorithm)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// Encrypts and decrypts entry values with one key.
pub struct CryptoManager {
    cipher: Cipher,
    algorithm: CipherAlgorithm,
}

impl CryptoManager {
    /// Creates a crypto manager for `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        // Key length was checked against the algorithm when the key was built
        let bytes = key.as_bytes();
        let cipher = match key.algorithm() {
            CipherAlgorithm::Aes128Gcm => {
                Cipher::Aes128(Box::new(Aes128Gcm::new(GenericArray::from_slice(bytes))))
            }
            CipherAlgorithm::Aes256Gcm => {
                Cipher::Aes256(Box::new(Aes256Gcm::new(GenericArray::from_slice(bytes))))
            }
        };
        Self {
            cipher,
            algorithm: key.algorithm(),
        }
    }

    /// Returns the algorithm in use.
    #[must_use]
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Encrypts `plaintext`, binding `aad` (the entry key).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CryptoFailure`] if the cipher fails.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> ConfigResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let payload = Payload {
            msg: plaintext,
            aad,
        };

        let ciphertext = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, payload),
            Cipher::Aes256(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| ConfigError::crypto_failure("encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    /// Decrypts data produced by [`encrypt`](Self::encrypt) with the same
    /// `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CryptoFailure`] if the data is too short or
    /// fails authentication (wrong key, wrong entry key, corruption).
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> ConfigResult<Vec<u8>> {
        if ciphertext.len() < CIPHERTEXT_OVERHEAD {
            return Err(ConfigError::crypto_failure("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        let payload = Payload {
            msg: &ciphertext[NONCE_SIZE..],
            aad,
        };

        let plaintext = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, payload),
            Cipher::Aes256(c) => c.decrypt(nonce, payload),
        };
        plaintext.map_err(|_| ConfigError::crypto_failure("decryption error"))
    }
}

impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_sizes_are_checked() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16], CipherAlgorithm::Aes128Gcm).is_ok());
        assert!(EncryptionKey::from_bytes(&[0u8; 32], CipherAlgorithm::Aes256Gcm).is_ok());
        assert!(matches!(
            EncryptionKey::from_bytes(&[0u8; 16], CipherAlgorithm::Aes256Gcm),
            Err(ConfigError::InvalidParameter { .. })
        ));
        assert!(EncryptionKey::from_bytes(&[0u8; 33], CipherAlgorithm::Aes256Gcm).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let a = EncryptionKey::generate(CipherAlgorithm::Aes256Gcm);
        let b = EncryptionKey::generate(CipherAlgorithm::Aes256Gcm);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), 32);
    }

    #[test]
    fn encrypt_decrypt_roundtrip_both_algorithms() {
        for algorithm in [CipherAlgorithm::Aes128Gcm, CipherAlgorithm::Aes256Gcm] {
            let manager = CryptoManager::new(&EncryptionKey::generate(algorithm));
            let ciphertext = manager.encrypt(b"hunter2", b"secret").unwrap();
            assert_eq!(ciphertext.len(), 7 + CIPHERTEXT_OVERHEAD);
            assert_eq!(manager.decrypt(&ciphertext, b"secret").unwrap(), b"hunter2");
        }
    }

    #[test]
    fn nonces_make_ciphertexts_differ() {
        let manager = CryptoManager::new(&EncryptionKey::generate(CipherAlgorithm::Aes256Gcm));
        let a = manager.encrypt(b"same", b"k").unwrap();
        let b = manager.encrypt(b"same", b"k").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_or_aad_fails() {
        let m1 = CryptoManager::new(&EncryptionKey::generate(CipherAlgorithm::Aes256Gcm));
        let m2 = CryptoManager::new(&EncryptionKey::generate(CipherAlgorithm::Aes256Gcm));
        let ciphertext = m1.encrypt(b"data", b"k").unwrap();

        assert!(matches!(
            m2.decrypt(&ciphertext, b"k"),
            Err(ConfigError::CryptoFailure { .. })
        ));
        assert!(m1.decrypt(&ciphertext, b"other").is_err());
    }

    #[test]
    fn corrupted_or_short_ciphertext_fails() {
        let manager = CryptoManager::new(&EncryptionKey::generate(CipherAlgorithm::Aes128Gcm));
        let mut ciphertext = manager.encrypt(b"data", b"k").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(manager.decrypt(&ciphertext, b"k").is_err());
        assert!(manager.decrypt(&[0u8; 10], b"k").is_err());
    }

    #[test]
    fn passphrase_derivation_is_deterministic() {
        let a = EncryptionKey::derive_from_passphrase(b"device-secret", b"salt", CipherAlgorithm::Aes256Gcm)
            .unwrap();
        let b = EncryptionKey::derive_from_passphrase(b"device-secret", b"salt", CipherAlgorithm::Aes256Gcm)
            .unwrap();
        let c = EncryptionKey::derive_from_passphrase(b"device-secret", b"pepper", CipherAlgorithm::Aes256Gcm)
            .unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert!(EncryptionKey::derive_from_passphrase(b"", b"salt", CipherAlgorithm::Aes128Gcm).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let key = EncryptionKey::from_bytes(&[0x41; 16], CipherAlgorithm::Aes128Gcm).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("65"));
    }
}
