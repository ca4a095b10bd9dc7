//! Optional whole-file, per-page authenticated encryption, applied as a
//! transparent transform between the pager and the page source.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zerocopy::big_endian::U32;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};

pub const MAGIC: [u8; 8] = *b"SHARC_E1";
const VERSION: u32 = 1;
const KDF_ARGON2ID: u32 = 1;
const CIPHER_AES_256_GCM: u32 = 1;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
pub const HEADER_SIZE: usize = 128;

/// A page source's byte backing is widened by `NONCE_SIZE + TAG_SIZE` per
/// page once encrypted.
pub fn transformed_page_size(page_size: u32) -> u32 {
    page_size + NONCE_SIZE as u32 + TAG_SIZE as u32
}

#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::AsBytes, zerocopy::Unaligned)]
#[repr(C)]
pub struct EncryptionHeader {
    magic: [u8; 8],
    version: U32,
    kdf_id: U32,
    cipher_id: U32,
    time_cost: U32,
    memory_cost_kib: U32,
    parallelism: U32,
    salt: [u8; 32],
    verification_hash: [u8; 32],
    page_size: U32,
    page_count: U32,
    reserved: [u8; 24],
}

impl EncryptionHeader {
    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.get()
    }

    pub fn set_page_count(&mut self, n: u32) {
        self.page_count = n.into();
    }

    fn validate_magic(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::corrupt("bad encryption header magic"));
        }
        if self.version.get() != VERSION {
            return Err(Error::unsupported(format!(
                "unsupported encryption header version {}",
                self.version.get()
            )));
        }
        if self.kdf_id.get() != KDF_ARGON2ID {
            return Err(Error::unsupported("unsupported KDF id"));
        }
        if self.cipher_id.get() != CIPHER_AES_256_GCM {
            return Err(Error::unsupported("unsupported cipher id"));
        }
        Ok(())
    }
}

/// Transparent transform applied between the pager and a page source.
pub trait Transform: std::fmt::Debug {
    /// Decrypts/authenticates ciphertext read for page `n`, returning the
    /// plaintext page bytes.
    fn transform_read(&self, page_number: u32, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Encrypts plaintext page bytes for page `n`, returning the bytes to
    /// store (ciphertext + nonce + tag, laid out deterministically).
    fn transform_write(&self, page_number: u32, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// The widened page size used by the underlying storage, or the plain
    /// page size if this transform does not widen pages.
    fn storage_page_size(&self, page_size: u32) -> u32 {
        page_size
    }
}

#[derive(Debug, Default)]
pub struct NoopTransform;

impl Transform for NoopTransform {
    fn transform_read(&self, _page_number: u32, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn transform_write(&self, _page_number: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }
}

#[derive(Debug)]
pub struct AesGcmTransform {
    key: [u8; 32],
}

struct Argon2Params {
    time_cost: u32,
    memory_cost_kib: u32,
    parallelism: u32,
}

const DEFAULT_PARAMS: Argon2Params = Argon2Params {
    time_cost: 3,
    memory_cost_kib: 19 * 1024,
    parallelism: 1,
};

impl AesGcmTransform {
    /// Creates a fresh encryption header for a brand-new database and the
    /// transform to encrypt/decrypt its pages.
    pub fn create(password: &str, page_size: u32, page_count: u32) -> Result<(EncryptionHeader, Self)> {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        let params = DEFAULT_PARAMS;
        let key = derive_key(password, &salt, &params)?;
        let verification_hash = verification_hash(&key, &salt);

        let header = EncryptionHeader {
            magic: MAGIC,
            version: VERSION.into(),
            kdf_id: KDF_ARGON2ID.into(),
            cipher_id: CIPHER_AES_256_GCM.into(),
            time_cost: params.time_cost.into(),
            memory_cost_kib: params.memory_cost_kib.into(),
            parallelism: params.parallelism.into(),
            salt,
            verification_hash,
            page_size: page_size.into(),
            page_count: page_count.into(),
            reserved: [0; 24],
        };

        Ok((header, Self { key }))
    }

    /// Opens an existing encrypted file: parses the header, derives the
    /// key, and checks the verification hash. Fails with
    /// `Error::BadCredentials` on mismatch.
    pub fn open(password: &str, header_bytes: &[u8]) -> Result<(EncryptionHeader, Self)> {
        let header = EncryptionHeader::read_from_prefix(header_bytes)
            .ok_or_else(|| Error::corrupt("truncated encryption header"))?;
        header.validate_magic()?;

        let params = Argon2Params {
            time_cost: header.time_cost.get(),
            memory_cost_kib: header.memory_cost_kib.get(),
            parallelism: header.parallelism.get(),
        };
        let key = derive_key(password, &header.salt, &params)?;
        let expected = verification_hash(&key, &header.salt);

        if !constant_time_eq(&expected, &header.verification_hash) {
            return Err(Error::BadCredentials);
        }

        Ok((header, Self { key }))
    }
}

fn derive_key(password: &str, salt: &[u8; 32], params: &Argon2Params) -> Result<[u8; 32]> {
    let argon2_params = argon2::Params::new(
        params.memory_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|err| Error::invalid_argument(format!("invalid KDF parameters: {err}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon2_params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|err| Error::invalid_argument(format!("key derivation failed: {err}")))?;
    Ok(key)
}

fn verification_hash(key: &[u8; 32], salt: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(salt);
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl Transform for AesGcmTransform {
    fn transform_read(&self, page_number: u32, slot: &[u8]) -> Result<Vec<u8>> {
        if slot.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::corrupt("encrypted page slot too short"));
        }
        let (nonce_bytes, rest) = slot.split_at(NONCE_SIZE);
        let ciphertext = rest; // includes the trailing tag, as aes-gcm expects

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);
        let aad = page_number.to_be_bytes();

        cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad: &aad })
            .map_err(|_| Error::Tampered)
    }

    fn transform_write(&self, page_number: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = page_number.to_be_bytes();

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|_| Error::invalid_operation("encryption failure"))?;

        let mut slot = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        slot.extend_from_slice(&nonce_bytes);
        slot.extend_from_slice(&ciphertext);
        Ok(slot)
    }

    fn storage_page_size(&self, page_size: u32) -> u32 {
        transformed_page_size(page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let (header, transform) = AesGcmTransform::create("correct-horse-battery-staple", 4096, 2).unwrap();
        let header_bytes = header.as_bytes().to_vec();

        let (_, reopened) = AesGcmTransform::open("correct-horse-battery-staple", &header_bytes).unwrap();

        let plaintext = vec![0x42; 4096];
        let slot = reopened.transform_write(1, &plaintext).unwrap();
        assert_eq!(slot.len() as u32, transformed_page_size(4096));

        let decrypted = reopened.transform_read(1, &slot).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_password_fails() {
        let (header, _) = AesGcmTransform::create("correct-horse-battery-staple", 4096, 1).unwrap();
        let header_bytes = header.as_bytes().to_vec();

        let result = AesGcmTransform::open("wrong-password", &header_bytes);
        assert!(matches!(result, Err(Error::BadCredentials)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (_, transform) = AesGcmTransform::create("pw", 512, 1).unwrap();
        let plaintext = vec![1; 512];
        let mut slot = transform.transform_write(1, &plaintext).unwrap();
        let last = slot.len() - 1;
        slot[last] ^= 0xff;

        let result = transform.transform_read(1, &slot);
        assert!(matches!(result, Err(Error::Tampered)));
    }

    #[test]
    fn test_wrong_page_number_fails() {
        let (_, transform) = AesGcmTransform::create("pw", 512, 1).unwrap();
        let plaintext = vec![1; 512];
        let slot = transform.transform_write(1, &plaintext).unwrap();

        let result = transform.transform_read(2, &slot);
        assert!(matches!(result, Err(Error::Tampered)));
    }
}
