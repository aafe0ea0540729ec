//! Encryption keys and key material.

use crate::error::{StorageError, StorageResult};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the key derivation salt in bytes.
pub const SALT_SIZE: usize = 16;

const KDF_INFO: &[u8] = b"oheap-block-key-v1";

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// # Security Note
    ///
    /// HKDF is not a password hashing function. Use high-entropy passphrases,
    /// or stretch user-chosen passwords before passing them here.
    ///
    /// # Errors
    ///
    /// Returns an error if the derivation fails.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> StorageResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut bytes)
            .map_err(|_| StorageError::encryption("HKDF expand failed"))?;

        Ok(Self { bytes })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// What the caller supplies to unlock a device.
#[derive(Clone)]
pub enum KeyMaterial {
    /// A raw key, used as is.
    Key(EncryptionKey),
    /// A passphrase; the key is derived with the salt stored on the device.
    Passphrase(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    /// Wraps a passphrase.
    pub fn passphrase(passphrase: impl Into<Vec<u8>>) -> Self {
        Self::Passphrase(Zeroizing::new(passphrase.into()))
    }
}

impl From<EncryptionKey> for KeyMaterial {
    fn from(key: EncryptionKey) -> Self {
        Self::Key(key)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Self::Passphrase(_) => f.debug_tuple("Passphrase").field(&"[REDACTED]").finish(),
        }
    }
}

/// Encryption settings for creating a device.
#[derive(Debug, Clone, Default)]
pub struct EncryptionConfig {
    /// Key material for the new device. A random key is generated when `None`.
    pub key: Option<KeyMaterial>,
}

impl EncryptionConfig {
    /// Creates a configuration that generates a fresh key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given key.
    #[must_use]
    pub fn with_key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(KeyMaterial::Key(key));
        self
    }

    /// Derives the key from a passphrase and a fresh random salt.
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<Vec<u8>>) -> Self {
        self.key = Some(KeyMaterial::passphrase(passphrase));
        self
    }
}

pub(crate) fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
