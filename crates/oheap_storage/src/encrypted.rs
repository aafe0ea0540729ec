//! Encrypted block storage wrapper.
//!
//! Wraps any [`BlockDevice`] with AES-256-GCM encryption at rest.
//!
//! ## Security Model
//!
//! - Each block is encrypted independently with a fresh random nonce per write
//! - Stored block: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - The block index is authenticated as associated data, so a ciphertext
//!   copied to another position fails to decrypt
//! - Any failed tag check is reported as [`StorageError::Integrity`]
//! - Keys are never stored. Devices created from a passphrase store only the
//!   HKDF salt
//!
//! ## Header
//!
//! The raw device's caller header starts with a 48-byte encryption header,
//! followed by this layer's caller header:
//!
//! ```text
//! offset  size  field
//! 0       1     version (1)
//! 1       1     cipher (1 = AES-256-GCM)
//! 2       1     kdf (0 = external key, 1 = HKDF-SHA256 passphrase)
//! 3       1     reserved
//! 4       16    salt (zero for kdf 0)
//! 20      28    key check: nonce || tag over an empty message
//! ```
//!
//! The key check authenticates the caller header with the key, so
//! [`EncryptedBlockStorage::verify_key`] detects a wrong key or an altered
//! header without touching any block.

use crate::backend::{BlockDevice, BlockInitializer, BlockStorage};
use crate::config::{BlockStorageConfig, OpenOptions};
use crate::error::{StorageError, StorageResult};
use crate::key::{random_salt, EncryptionConfig, EncryptionKey, KeyMaterial, SALT_SIZE};
use crate::layout;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::fmt;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Bytes added to every block by encryption.
pub const BLOCK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
/// Size of the encryption header in bytes.
pub const ENCRYPTION_HEADER_SIZE: usize = 48;

const HEADER_VERSION: u8 = 1;
const CIPHER_AES_256_GCM: u8 = 1;
const KEY_CHECK_LABEL: &[u8] = b"oheap-key-check";

/// Returns the stored size of a block holding `block_size` plaintext bytes.
#[must_use]
pub const fn ciphertext_block_size(block_size: usize) -> usize {
    block_size + BLOCK_OVERHEAD
}

/// How the device key was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivation {
    /// The key is supplied by the caller on every open.
    External,
    /// The key is derived from a passphrase with HKDF-SHA256 and the stored salt.
    HkdfSha256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EncryptionHeader {
    kdf: KeyDerivation,
    salt: [u8; SALT_SIZE],
    key_check: [u8; BLOCK_OVERHEAD],
}

impl EncryptionHeader {
    fn encode(&self) -> [u8; ENCRYPTION_HEADER_SIZE] {
        let mut out = [0u8; ENCRYPTION_HEADER_SIZE];
        out[0] = HEADER_VERSION;
        out[1] = CIPHER_AES_256_GCM;
        out[2] = match self.kdf {
            KeyDerivation::External => 0,
            KeyDerivation::HkdfSha256 => 1,
        };
        out[4..20].copy_from_slice(&self.salt);
        out[20..48].copy_from_slice(&self.key_check);
        out
    }

    fn decode(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < ENCRYPTION_HEADER_SIZE {
            return Err(StorageError::invalid_format(
                "device has no encryption header",
            ));
        }
        if bytes[0] != HEADER_VERSION {
            return Err(StorageError::invalid_format(format!(
                "unsupported encryption header version {}",
                bytes[0]
            )));
        }
        if bytes[1] != CIPHER_AES_256_GCM {
            return Err(StorageError::invalid_format(format!(
                "unsupported cipher {}",
                bytes[1]
            )));
        }
        let kdf = match bytes[2] {
            0 => KeyDerivation::External,
            1 => KeyDerivation::HkdfSha256,
            other => {
                return Err(StorageError::invalid_format(format!(
                    "unsupported key derivation {other}"
                )))
            }
        };

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[4..20]);
        let mut key_check = [0u8; BLOCK_OVERHEAD];
        key_check.copy_from_slice(&bytes[20..48]);

        Ok(Self {
            kdf,
            salt,
            key_check,
        })
    }
}

/// Block cipher state shared by setup and the opened storage.
struct BlockCipher {
    cipher: Aes256Gcm,
}

impl BlockCipher {
    fn new(key: &EncryptionKey) -> Self {
        // EncryptionKey is always exactly KEY_SIZE (32) bytes, AES-256's key size.
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }

    fn seal(&self, aad: &[u8], plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| StorageError::encryption("encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    fn open(&self, aad: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < BLOCK_OVERHEAD {
            return None;
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[NONCE_SIZE..],
                    aad,
                },
            )
            .ok()
    }

    fn seal_block(&self, index: u64, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        self.seal(&index.to_le_bytes(), plaintext)
    }

    fn open_block(&self, index: u64, sealed: &[u8]) -> StorageResult<Vec<u8>> {
        self.open(&index.to_le_bytes(), sealed).ok_or_else(|| {
            StorageError::integrity(format!("block {index} failed authentication"))
        })
    }

    fn key_check(&self, header_data: &[u8]) -> StorageResult<[u8; BLOCK_OVERHEAD]> {
        let sealed = self.seal(&key_check_aad(header_data), &[])?;
        let mut out = [0u8; BLOCK_OVERHEAD];
        out.copy_from_slice(&sealed);
        Ok(out)
    }

    fn verify_key_check(&self, header_data: &[u8], key_check: &[u8]) -> bool {
        self.open(&key_check_aad(header_data), key_check).is_some()
    }
}

fn key_check_aad(header_data: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(KEY_CHECK_LABEL.len() + header_data.len());
    aad.extend_from_slice(KEY_CHECK_LABEL);
    aad.extend_from_slice(header_data);
    aad
}

/// A block storage that encrypts every block of an underlying device.
///
/// Exposes the plaintext block size; the device underneath stores
/// [`ciphertext_block_size`] bytes per block, fixed at setup.
///
/// # Example
///
/// ```rust
/// use oheap_storage::{
///     BlockStorage, BlockStorageConfig, EncryptedBlockStorage, EncryptionConfig,
///     MemoryBlockStorage, MemoryRegion, OpenOptions,
/// };
///
/// let region = MemoryRegion::new();
/// let mut storage = EncryptedBlockStorage::<MemoryBlockStorage>::setup(
///     &region,
///     &BlockStorageConfig::new(16, 4),
///     &EncryptionConfig::new(),
///     None,
/// )
/// .unwrap();
/// storage.write_block(1, &[42u8; 16]).unwrap();
/// let key = storage.key().clone();
/// storage.close().unwrap();
///
/// let storage =
///     EncryptedBlockStorage::<MemoryBlockStorage>::open(&region, key.into(), &OpenOptions::new())
///         .unwrap();
/// assert_eq!(storage.read_block(1).unwrap(), vec![42u8; 16]);
/// ```
pub struct EncryptedBlockStorage<D: BlockDevice> {
    raw: D,
    key: EncryptionKey,
    cipher: BlockCipher,
    header: EncryptionHeader,
    header_data: Vec<u8>,
    block_size: usize,
}

impl<D: BlockDevice> EncryptedBlockStorage<D> {
    /// Creates a new encrypted device.
    ///
    /// `config.block_size` is the plaintext block size; the raw device is
    /// created with [`ciphertext_block_size`]. Every block is initialized
    /// with the encryption of zeros, or of the initializer's bytes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any I/O if the configuration is
    /// invalid, or any error from the raw device's setup.
    pub fn setup(
        location: &D::Location,
        config: &BlockStorageConfig,
        encryption: &EncryptionConfig,
        initializer: Option<&BlockInitializer<'_>>,
    ) -> StorageResult<Self> {
        config.validate()?;
        let raw_block_size = config
            .block_size
            .checked_add(BLOCK_OVERHEAD)
            .ok_or_else(|| StorageError::config("block size too large"))?;
        Self::compute_storage_size(
            config.block_size,
            config.block_count,
            config.header_data.len(),
            false,
        )?;

        let (key, kdf, salt) = match &encryption.key {
            None => (EncryptionKey::generate(), KeyDerivation::External, [0u8; SALT_SIZE]),
            Some(KeyMaterial::Key(key)) => (key.clone(), KeyDerivation::External, [0u8; SALT_SIZE]),
            Some(KeyMaterial::Passphrase(passphrase)) => {
                let salt = random_salt();
                let key = EncryptionKey::derive_from_passphrase(passphrase, &salt)?;
                (key, KeyDerivation::HkdfSha256, salt)
            }
        };
        let cipher = BlockCipher::new(&key);
        let header = EncryptionHeader {
            kdf,
            salt,
            key_check: cipher.key_check(&config.header_data)?,
        };

        let mut raw_header = Vec::with_capacity(ENCRYPTION_HEADER_SIZE + config.header_data.len());
        raw_header.extend_from_slice(&header.encode());
        raw_header.extend_from_slice(&config.header_data);

        let mut raw_config = config.clone();
        raw_config.block_size = raw_block_size;
        raw_config.header_data = raw_header;

        let plain_block_size = config.block_size;
        let zeros = vec![0u8; plain_block_size];
        let seal_initial = |index: u64| -> StorageResult<Vec<u8>> {
            match initializer {
                Some(init) => {
                    let block = init(index)?;
                    layout::check_block_len(block.len(), plain_block_size)?;
                    cipher.seal_block(index, &block)
                }
                None => cipher.seal_block(index, &zeros),
            }
        };

        let raw = D::setup(location, &raw_config, Some(&seal_initial))?;
        tracing::info!(
            storage = %raw.storage_name(),
            block_size = plain_block_size,
            block_count = config.block_count,
            kdf = ?kdf,
            "created encrypted block storage"
        );

        Ok(Self {
            raw,
            key,
            cipher,
            header,
            header_data: config.header_data.clone(),
            block_size: plain_block_size,
        })
    }

    /// Opens an existing encrypted device.
    ///
    /// The key is not checked unless `options.verify_key` is set; with a wrong
    /// key the first block read fails with an integrity error.
    ///
    /// # Errors
    ///
    /// Returns any error from opening the raw device, a format error if it is
    /// not an encrypted device, or an integrity error if verification was
    /// requested and fails.
    pub fn open(
        location: &D::Location,
        key: KeyMaterial,
        options: &OpenOptions,
    ) -> StorageResult<Self> {
        let raw = D::open(location, options)?;
        let storage = Self::from_raw(raw, key)?;
        if options.verify_key {
            storage.verify_key()?;
        }
        Ok(storage)
    }

    /// Wraps an already-open raw device.
    ///
    /// # Errors
    ///
    /// Returns a format error if the device has no valid encryption header, or
    /// a configuration error if a passphrase is given for a device that was
    /// not set up with one.
    pub fn from_raw(raw: D, key: KeyMaterial) -> StorageResult<Self> {
        let header = EncryptionHeader::decode(raw.header_data())?;
        let block_size = raw
            .block_size()
            .checked_sub(BLOCK_OVERHEAD)
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                StorageError::invalid_format(format!(
                    "raw block size {} too small for encrypted blocks",
                    raw.block_size()
                ))
            })?;

        let key = match key {
            KeyMaterial::Key(key) => key,
            KeyMaterial::Passphrase(passphrase) => {
                if header.kdf != KeyDerivation::HkdfSha256 {
                    return Err(StorageError::config(
                        "device was set up with an external key, not a passphrase",
                    ));
                }
                EncryptionKey::derive_from_passphrase(&passphrase, &header.salt)?
            }
        };

        let header_data = raw.header_data()[ENCRYPTION_HEADER_SIZE..].to_vec();
        Ok(Self {
            cipher: BlockCipher::new(&key),
            raw,
            key,
            header,
            header_data,
            block_size,
        })
    }

    /// Computes the bytes an encrypted device with these plaintext parameters
    /// occupies on the raw medium.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the size overflows.
    pub fn compute_storage_size(
        block_size: usize,
        block_count: u64,
        header_len: usize,
        ignore_header: bool,
    ) -> StorageResult<u64> {
        D::compute_storage_size(
            ciphertext_block_size(block_size),
            block_count,
            header_len + ENCRYPTION_HEADER_SIZE,
            ignore_header,
        )
    }

    /// Returns true if a device exists at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be queried.
    pub fn exists(location: &D::Location) -> StorageResult<bool> {
        D::exists(location)
    }

    /// Returns the key in use.
    ///
    /// Persist it out-of-band to reopen devices set up without a passphrase.
    #[must_use]
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Returns how the key was established.
    #[must_use]
    pub fn key_derivation(&self) -> KeyDerivation {
        self.header.kdf
    }

    /// Returns the raw device holding the ciphertext.
    #[must_use]
    pub fn raw_storage(&self) -> &D {
        &self.raw
    }

    /// Returns the raw device mutably.
    ///
    /// Writes through it bypass encryption and will fail authentication on
    /// the next read.
    pub fn raw_storage_mut(&mut self) -> &mut D {
        &mut self.raw
    }

    /// Returns the size of a stored (encrypted) block.
    #[must_use]
    pub fn ciphertext_block_size(&self) -> usize {
        self.raw.block_size()
    }

    /// Checks the key against the stored key-check value.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if the key is wrong or the header was altered.
    pub fn verify_key(&self) -> StorageResult<()> {
        if self
            .cipher
            .verify_key_check(&self.header_data, &self.header.key_check)
        {
            Ok(())
        } else {
            Err(StorageError::integrity(
                "key check failed: wrong key or altered header",
            ))
        }
    }

    /// Opens a second, independent handle with the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the raw device cannot be cloned.
    pub fn clone_device(&self) -> StorageResult<Self> {
        let raw = self.raw.clone_device()?;
        Self::from_raw(raw, KeyMaterial::Key(self.key.clone()))
    }

    /// Closes the raw device. The key is zeroized when dropped.
    ///
    /// # Errors
    ///
    /// Returns any error from closing the raw device.
    pub fn close(self) -> StorageResult<()> {
        self.raw.close()
    }
}

impl<D: BlockDevice> BlockStorage for EncryptedBlockStorage<D> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.raw.block_count()
    }

    fn header_data(&self) -> &[u8] {
        &self.header_data
    }

    fn storage_name(&self) -> String {
        self.raw.storage_name()
    }

    fn read_block(&self, index: u64) -> StorageResult<Vec<u8>> {
        let sealed = self.raw.read_block(index)?;
        self.cipher.open_block(index, &sealed)
    }

    fn read_block_range(&self, start: u64, count: u64) -> StorageResult<Vec<Vec<u8>>> {
        let sealed = self.raw.read_block_range(start, count)?;
        (start..)
            .zip(sealed)
            .map(|(index, block)| self.cipher.open_block(index, &block))
            .collect()
    }

    fn write_block(&mut self, index: u64, data: &[u8]) -> StorageResult<()> {
        layout::check_index(index, self.raw.block_count())?;
        layout::check_block_len(data.len(), self.block_size)?;
        let sealed = self.cipher.seal_block(index, data)?;
        self.raw.write_block(index, &sealed)
    }

    fn write_blocks(&mut self, start: u64, blocks: &[Vec<u8>]) -> StorageResult<()> {
        layout::check_range(start, blocks.len() as u64, self.raw.block_count())?;
        let sealed = (start..)
            .zip(blocks)
            .map(|(index, block)| {
                layout::check_block_len(block.len(), self.block_size)?;
                self.cipher.seal_block(index, block)
            })
            .collect::<StorageResult<Vec<_>>>()?;
        self.raw.write_blocks(start, &sealed)
    }

    fn update_header_data(&mut self, new_header: &[u8]) -> StorageResult<()> {
        if new_header.len() != self.header_data.len() {
            return Err(StorageError::HeaderSizeMismatch {
                expected: self.header_data.len(),
                actual: new_header.len(),
            });
        }
        let header = EncryptionHeader {
            key_check: self.cipher.key_check(new_header)?,
            ..self.header.clone()
        };

        let mut raw_header = Vec::with_capacity(ENCRYPTION_HEADER_SIZE + new_header.len());
        raw_header.extend_from_slice(&header.encode());
        raw_header.extend_from_slice(new_header);
        self.raw.update_header_data(&raw_header)?;

        self.header = header;
        self.header_data = new_header.to_vec();
        Ok(())
    }

    fn bytes_sent(&self) -> u64 {
        self.raw.bytes_sent()
    }

    fn bytes_received(&self) -> u64 {
        self.raw.bytes_received()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.raw.sync()
    }
}

impl<D: BlockDevice + fmt::Debug> fmt::Debug for EncryptedBlockStorage<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedBlockStorage")
            .field("raw", &self.raw)
            .field("key", &self.key)
            .field("cipher", &"Aes256Gcm")
            .field("kdf", &self.header.kdf)
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileBlockStorage, MemoryBlockStorage, MemoryRegion};
    use proptest::prelude::*;
    use tempfile::tempdir;

    type MemEncrypted = EncryptedBlockStorage<MemoryBlockStorage>;

    fn setup_mem(region: &MemoryRegion, key: &EncryptionKey) -> MemEncrypted {
        let config = BlockStorageConfig::new(16, 8).header_data(b"user".to_vec());
        MemEncrypted::setup(
            region,
            &config,
            &EncryptionConfig::new().with_key(key.clone()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::from_bytes(&[0x42u8; 32]).unwrap();
        let mut storage = setup_mem(&region, &key);

        assert_eq!(storage.read_block(3).unwrap(), vec![0u8; 16]);
        storage.write_block(3, b"Hello, encrypted").unwrap();
        assert_eq!(storage.read_block(3).unwrap(), b"Hello, encrypted");
        assert_eq!(storage.header_data(), b"user");
        assert_eq!(storage.block_size(), 16);
        assert_eq!(storage.ciphertext_block_size(), 16 + BLOCK_OVERHEAD);
    }

    #[test]
    fn plaintext_not_stored() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        let mut storage = setup_mem(&region, &key);
        storage.write_block(0, b"SECRETSECRETSECR").unwrap();

        let image = region.snapshot();
        assert!(!image.windows(16).any(|w| w == b"SECRETSECRETSECR"));
    }

    #[test]
    fn rewrites_use_fresh_nonces() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        let mut storage = setup_mem(&region, &key);

        storage.write_block(1, &[5u8; 16]).unwrap();
        let first = storage.raw_storage().read_block(1).unwrap();
        storage.write_block(1, &[5u8; 16]).unwrap();
        let second = storage.raw_storage().read_block(1).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn tampered_block_fails() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        let mut storage = setup_mem(&region, &key);
        storage.write_block(2, &[9u8; 16]).unwrap();

        let mut sealed = storage.raw_storage().read_block(2).unwrap();
        sealed[NONCE_SIZE + 1] ^= 0xFF;
        storage.raw_storage_mut().write_block(2, &sealed).unwrap();

        assert!(storage.read_block(2).unwrap_err().is_integrity());
    }

    #[test]
    fn swapped_blocks_fail() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        let mut storage = setup_mem(&region, &key);
        storage.write_block(4, &[4u8; 16]).unwrap();

        let sealed = storage.raw_storage().read_block(4).unwrap();
        storage.raw_storage_mut().write_block(5, &sealed).unwrap();

        assert!(storage.read_block(5).unwrap_err().is_integrity());
        assert_eq!(storage.read_block(4).unwrap(), vec![4u8; 16]);
    }

    #[test]
    fn different_keys_fail() {
        let region = MemoryRegion::new();
        let key1 = EncryptionKey::from_bytes(&[0x42u8; 32]).unwrap();
        let key2 = EncryptionKey::from_bytes(&[0x43u8; 32]).unwrap();
        let mut storage = setup_mem(&region, &key1);
        storage.write_block(0, &[1u8; 16]).unwrap();
        storage.close().unwrap();

        let storage = MemEncrypted::open(&region, key2.into(), &OpenOptions::new()).unwrap();
        assert!(storage.read_block(0).unwrap_err().is_integrity());
        assert!(storage.verify_key().unwrap_err().is_integrity());
    }

    #[test]
    fn verify_key_on_open() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        setup_mem(&region, &key).close().unwrap();

        let options = OpenOptions::new().verify_key(true);
        assert!(MemEncrypted::open(&region, key.clone().into(), &options).is_ok());
        assert!(MemEncrypted::open(&region, EncryptionKey::generate().into(), &options)
            .unwrap_err()
            .is_integrity());
    }

    #[test]
    fn header_tamper_detected_by_key_check() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        setup_mem(&region, &key).close().unwrap();

        // Caller header "user" follows the 32-byte device prefix and the
        // encryption header.
        region.with_bytes_mut(|bytes| bytes[32 + ENCRYPTION_HEADER_SIZE] ^= 1);
        let storage = MemEncrypted::open(&region, key.into(), &OpenOptions::new()).unwrap();
        assert!(storage.verify_key().unwrap_err().is_integrity());
    }

    #[test]
    fn passphrase_reopen() {
        let region = MemoryRegion::new();
        let config = BlockStorageConfig::new(16, 2);
        let mut storage = MemEncrypted::setup(
            &region,
            &config,
            &EncryptionConfig::new().with_passphrase("open sesame"),
            None,
        )
        .unwrap();
        assert_eq!(storage.key_derivation(), KeyDerivation::HkdfSha256);
        storage.write_block(1, &[3u8; 16]).unwrap();
        let derived = storage.key().clone();
        storage.close().unwrap();

        let storage = MemEncrypted::open(
            &region,
            KeyMaterial::passphrase("open sesame"),
            &OpenOptions::new().verify_key(true),
        )
        .unwrap();
        assert_eq!(storage.key(), &derived);
        assert_eq!(storage.read_block(1).unwrap(), vec![3u8; 16]);
        storage.close().unwrap();

        // The derived key opens the device directly as well.
        let storage = MemEncrypted::open(&region, derived.into(), &OpenOptions::new()).unwrap();
        assert_eq!(storage.read_block(1).unwrap(), vec![3u8; 16]);
        storage.close().unwrap();

        let wrong = MemEncrypted::open(
            &region,
            KeyMaterial::passphrase("open barley"),
            &OpenOptions::new().verify_key(true),
        );
        assert!(wrong.unwrap_err().is_integrity());
    }

    #[test]
    fn passphrase_rejected_for_external_key_device() {
        let region = MemoryRegion::new();
        setup_mem(&region, &EncryptionKey::generate()).close().unwrap();
        assert!(matches!(
            MemEncrypted::open(&region, KeyMaterial::passphrase("pw"), &OpenOptions::new()),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn generated_key_when_none_given() {
        let region = MemoryRegion::new();
        let storage = MemEncrypted::setup(
            &region,
            &BlockStorageConfig::new(8, 1),
            &EncryptionConfig::new(),
            None,
        )
        .unwrap();
        let key = storage.key().clone();
        storage.close().unwrap();

        let storage = MemEncrypted::open(&region, key.into(), &OpenOptions::new()).unwrap();
        assert_eq!(storage.read_block(0).unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn initializer_blocks_are_encrypted() {
        let region = MemoryRegion::new();
        let init = |index: u64| -> StorageResult<Vec<u8>> { Ok(vec![index as u8 + 1; 16]) };
        let storage = MemEncrypted::setup(
            &region,
            &BlockStorageConfig::new(16, 4),
            &EncryptionConfig::new(),
            Some(&init),
        )
        .unwrap();
        for index in 0..4 {
            assert_eq!(storage.read_block(index).unwrap(), vec![index as u8 + 1; 16]);
        }
    }

    #[test]
    fn wrong_length_and_range() {
        let region = MemoryRegion::new();
        let mut storage = setup_mem(&region, &EncryptionKey::generate());
        assert!(matches!(
            storage.write_block(0, &[0u8; 44]),
            Err(StorageError::BlockSizeMismatch { expected: 16, actual: 44 })
        ));
        assert!(storage.read_block(8).unwrap_err().is_out_of_range());
        assert!(storage.read_block(u64::MAX).unwrap_err().is_out_of_range());
        assert!(storage.write_block(8, &[0u8; 16]).unwrap_err().is_out_of_range());
    }

    #[test]
    fn range_io_roundtrip() {
        let region = MemoryRegion::new();
        let mut storage = setup_mem(&region, &EncryptionKey::generate());
        let blocks: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i + 10; 16]).collect();
        storage.write_blocks(5, &blocks).unwrap();
        assert_eq!(storage.read_block_range(5, 3).unwrap(), blocks);
    }

    #[test]
    fn update_header_keeps_key_check_valid() {
        let region = MemoryRegion::new();
        let key = EncryptionKey::generate();
        let mut storage = setup_mem(&region, &key);
        storage.update_header_data(b"USER").unwrap();
        storage.close().unwrap();

        let storage = MemEncrypted::open(
            &region,
            key.into(),
            &OpenOptions::new().verify_key(true),
        )
        .unwrap();
        assert_eq!(storage.header_data(), b"USER");
    }

    #[test]
    fn file_storage_size_matches_computed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enc.bin");
        let config = BlockStorageConfig::new(64, 10).header_data(vec![1, 2, 3]);
        let storage = EncryptedBlockStorage::<FileBlockStorage>::setup(
            &path,
            &config,
            &EncryptionConfig::new(),
            None,
        )
        .unwrap();

        let expected =
            EncryptedBlockStorage::<FileBlockStorage>::compute_storage_size(64, 10, 3, false)
                .unwrap();
        assert_eq!(expected, 32 + 48 + 3 + 10 * (64 + 28));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
        assert_eq!(
            EncryptedBlockStorage::<FileBlockStorage>::compute_storage_size(64, 10, 3, true)
                .unwrap(),
            10 * (64 + 28)
        );
        drop(storage);
    }

    #[test]
    fn clone_shares_device() {
        let region = MemoryRegion::new();
        let mut storage = setup_mem(&region, &EncryptionKey::generate());
        let clone = storage.clone_device().unwrap();
        storage.write_block(7, &[7u8; 16]).unwrap();
        assert_eq!(clone.read_block(7).unwrap(), vec![7u8; 16]);
        assert_eq!(clone.key(), storage.key());
    }

    proptest! {
        #[test]
        fn roundtrip_any_block(index in 0u64..8, data in proptest::collection::vec(any::<u8>(), 16)) {
            let region = MemoryRegion::new();
            let mut storage = setup_mem(&region, &EncryptionKey::generate());
            storage.write_block(index, &data).unwrap();
            prop_assert_eq!(storage.read_block(index).unwrap(), data);
        }

        #[test]
        fn any_bit_flip_detected(bit in 0usize..(16 + BLOCK_OVERHEAD) * 8) {
            let region = MemoryRegion::new();
            let mut storage = setup_mem(&region, &EncryptionKey::generate());
            storage.write_block(0, &[0xA5; 16]).unwrap();

            let mut sealed = storage.raw_storage().read_block(0).unwrap();
            sealed[bit / 8] ^= 1 << (bit % 8);
            storage.raw_storage_mut().write_block(0, &sealed).unwrap();

            prop_assert!(storage.read_block(0).unwrap_err().is_integrity());
        }
    }
}
