//! AES block-cipher codecs (CBC and ECB) with a pluggable padding scheme.
//!
//! Padding is applied by [`crate::padding`] and the cipher itself runs with
//! `NoPadding`, so the lenient vendor unpadding rules are preserved exactly.
//!
//! ```ignore
//! use wxkit_rs::cipher::AesCbc;
//! use wxkit_rs::padding::Padding;
//!
//! let key = [0x11u8; 32];
//! let codec = AesCbc::new(&key, &key[..16], Padding::Pkcs7)?;
//! let cipher = codec.encrypt(b"<xml>...</xml>")?;
//! assert_eq!(codec.decrypt(&cipher)?, b"<xml>...</xml>");
//! ```

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use thiserror::Error;

use crate::padding::Padding;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Local crypto failures (key/iv shape, ciphertext layout, integrity).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid aes key length: {0} (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
    #[error("IV length mismatch: expected {expected}, got {actual}")]
    IvLengthMismatch { expected: usize, actual: usize },
    #[error("input length {0} is not a multiple of the aes block size")]
    UnalignedInput(usize),
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("bad message format")]
    BadFormat,
    #[error("receiver id mismatch: expected {expected}, got {actual}")]
    ReceiverIdMismatch { expected: String, actual: String },
    #[error("appid mismatch in watermark: expected {expected}, got {actual}")]
    AppIdMismatch { expected: String, actual: String },
    #[error("utf8 decode error: {0}")]
    Utf8(String),
    #[error("json error: {0}")]
    Json(String),
    #[error("aead decryption failed")]
    Aead,
}

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(CryptoError::InvalidKeyLength(n)),
    }
}

/// PKCS#7 in this family is sized by key length. AES-192 keys are widened to
/// 48 bytes so the padded buffer stays block-aligned.
fn pkcs7_block_size(key_len: usize) -> u8 {
    if key_len % AES_BLOCK_SIZE == 0 {
        key_len as u8
    } else {
        (key_len * 2) as u8
    }
}

fn pad_block_size(padding: Padding, key_len: usize) -> u8 {
    match padding {
        Padding::Pkcs7 => pkcs7_block_size(key_len),
        Padding::Pkcs5 | Padding::Zero => AES_BLOCK_SIZE as u8,
    }
}

fn check_aligned(data: &[u8]) -> Result<(), CryptoError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::UnalignedInput(data.len()));
    }
    Ok(())
}

/// AES in CBC mode.
#[derive(Clone)]
pub struct AesCbc {
    key: Vec<u8>,
    iv: [u8; AES_BLOCK_SIZE],
    padding: Padding,
}

impl std::fmt::Debug for AesCbc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCbc")
            .field("key_len", &self.key.len())
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

impl AesCbc {
    /// Build a codec. The IV must be exactly one AES block; it is never
    /// truncated or extended.
    pub fn new(key: &[u8], iv: &[u8], padding: Padding) -> Result<Self, CryptoError> {
        check_key(key)?;
        let iv: [u8; AES_BLOCK_SIZE] =
            iv.try_into()
                .map_err(|_| CryptoError::IvLengthMismatch {
                    expected: AES_BLOCK_SIZE,
                    actual: iv.len(),
                })?;
        Ok(Self {
            key: key.to_vec(),
            iv,
            padding,
        })
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    /// Pad then CBC-encrypt.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let padded = self
            .padding
            .pad(plain, pad_block_size(self.padding, self.key.len()));
        check_aligned(&padded)?;
        match self.key.len() {
            16 => cbc_encrypt::<Aes128>(&self.key, &self.iv, &padded),
            24 => cbc_encrypt::<Aes192>(&self.key, &self.iv, &padded),
            32 => cbc_encrypt::<Aes256>(&self.key, &self.iv, &padded),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    /// CBC-decrypt then unpad (leniently).
    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_aligned(cipher)?;
        let mut plain = match self.key.len() {
            16 => cbc_decrypt::<Aes128>(&self.key, &self.iv, cipher)?,
            24 => cbc_decrypt::<Aes192>(&self.key, &self.iv, cipher)?,
            32 => cbc_decrypt::<Aes256>(&self.key, &self.iv, cipher)?,
            n => return Err(CryptoError::InvalidKeyLength(n)),
        };
        let keep = self
            .padding
            .unpad(&plain, pad_block_size(self.padding, self.key.len()))
            .len();
        plain.truncate(keep);
        Ok(plain)
    }
}

/// AES in ECB mode. Legacy vendor endpoints only; no IV, no chaining.
#[derive(Clone)]
pub struct AesEcb {
    key: Vec<u8>,
    padding: Padding,
}

impl std::fmt::Debug for AesEcb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesEcb")
            .field("key_len", &self.key.len())
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

impl AesEcb {
    pub fn new(key: &[u8], padding: Padding) -> Result<Self, CryptoError> {
        check_key(key)?;
        Ok(Self {
            key: key.to_vec(),
            padding,
        })
    }

    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let padded = self
            .padding
            .pad(plain, pad_block_size(self.padding, self.key.len()));
        check_aligned(&padded)?;
        match self.key.len() {
            16 => ecb_encrypt::<Aes128>(&self.key, &padded),
            24 => ecb_encrypt::<Aes192>(&self.key, &padded),
            32 => ecb_encrypt::<Aes256>(&self.key, &padded),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_aligned(cipher)?;
        let mut plain = match self.key.len() {
            16 => ecb_decrypt::<Aes128>(&self.key, cipher)?,
            24 => ecb_decrypt::<Aes192>(&self.key, cipher)?,
            32 => ecb_decrypt::<Aes256>(&self.key, cipher)?,
            n => return Err(CryptoError::InvalidKeyLength(n)),
        };
        let keep = self
            .padding
            .unpad(&plain, pad_block_size(self.padding, self.key.len()))
            .len();
        plain.truncate(keep);
        Ok(plain)
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let enc = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(data))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| CryptoError::UnalignedInput(data.len()))
}

fn ecb_encrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let enc = ecb::Encryptor::<C>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(data))
}

fn ecb_decrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    ecb::Decryptor::<C>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| CryptoError::UnalignedInput(data.len()))
}
