//! Password-based encryption of the database file.
//!
//! An encrypted database is stored as `{"encrypted": "<base64 blob>"}`. The
//! blob is self-describing so key derivation can be retuned without breaking
//! existing files:
//!
//! ```text
//! offset  size  field
//! 0       1     format version (1)
//! 1       4     argon2 memory cost in KiB, little endian
//! 5       4     argon2 iterations, little endian
//! 9       4     argon2 parallelism, little endian
//! 13      16    salt
//! 29      12    nonce
//! 41      ..    ChaCha20-Poly1305 ciphertext with 16-byte tag
//! ```
//!
//! The 41-byte header is bound to the ciphertext as associated data, so a
//! tampered header fails authentication just like a tampered payload.

use argon2::{Algorithm, Argon2, Params, ParamsBuilder, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{StorageError, StorageResult};

const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const SYMMETRIC_KEY_LEN: usize = 32;
const HEADER_LEN: usize = 1 + 4 + 4 + 4 + SALT_LEN + NONCE_LEN;

/// Upper bounds on the costs accepted from a file header; the header is
/// not authenticated until after key derivation.
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn build(&self) -> StorageResult<Params> {
        Ok(ParamsBuilder::new()
            .m_cost(self.memory_kib)
            .t_cost(self.iterations)
            .p_cost(self.parallelism)
            .output_len(SYMMETRIC_KEY_LEN)
            .build()?)
    }
}

fn derive_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> StorageResult<Zeroizing<[u8; SYMMETRIC_KEY_LEN]>> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.build()?);
    let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
    argon2.hash_password_into(password.as_bytes(), salt, key.as_mut())?;
    Ok(key)
}

/// Encrypt `plaintext` under `password`.
pub fn seal(plaintext: &[u8], password: &str, params: &KdfParams) -> StorageResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut blob = Vec::with_capacity(HEADER_LEN + plaintext.len() + 16);
    blob.push(FORMAT_VERSION);
    blob.extend_from_slice(&params.memory_kib.to_le_bytes());
    blob.extend_from_slice(&params.iterations.to_le_bytes());
    blob.extend_from_slice(&params.parallelism.to_le_bytes());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);

    let key = derive_key(password, &salt, params)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &blob[..HEADER_LEN],
            },
        )
        .map_err(|err| StorageError::Encryption(err.to_string()))?;

    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Decrypt a blob produced by [`seal`].
///
/// # Errors
///
/// Every failure past the header shape, including a wrong password, is
/// reported as `StorageError::Authentication` and no plaintext is returned.
pub fn open(blob: &[u8], password: &str) -> StorageResult<Zeroizing<Vec<u8>>> {
    if blob.len() < HEADER_LEN {
        return Err(StorageError::CorruptDatabase(format!(
            "encrypted payload too short: {} bytes",
            blob.len()
        )));
    }
    if blob[0] != FORMAT_VERSION {
        return Err(StorageError::CorruptDatabase(format!(
            "unsupported encryption format version {}",
            blob[0]
        )));
    }

    let params = KdfParams {
        memory_kib: read_u32(blob, 1),
        iterations: read_u32(blob, 5),
        parallelism: read_u32(blob, 9),
    };
    if params.memory_kib > MAX_MEMORY_KIB
        || params.iterations > MAX_ITERATIONS
        || params.parallelism > MAX_PARALLELISM
    {
        return Err(StorageError::Authentication);
    }

    let salt = &blob[13..13 + SALT_LEN];
    let nonce = &blob[13 + SALT_LEN..HEADER_LEN];
    let key = derive_key(password, salt, &params).map_err(|_| StorageError::Authentication)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &blob[HEADER_LEN..],
                aad: &blob[..HEADER_LEN],
            },
        )
        .map_err(|_| StorageError::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}
