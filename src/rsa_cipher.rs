//! RSA helpers over PEM keys.
//!
//! - Private keys: PKCS#1 (`BEGIN RSA PRIVATE KEY`) or PKCS#8 (`BEGIN PRIVATE KEY`)
//! - Public keys: PKCS#1 (`BEGIN RSA PUBLIC KEY`) or SPKI (`BEGIN PUBLIC KEY`)
//! - Encryption: PKCS#1 v1.5 or OAEP with SHA-1 (WeChat Pay sensitive fields)
//! - Signatures: SHA256withRSA, PKCS#1 v1.5 (WeChat Pay v3, Alipay RSA2)

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RsaError {
    #[error("pem decode error: {0}")]
    Pem(String),
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Padding used for RSA encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    Pkcs1v15,
    OaepSha1,
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, RsaError> {
    let pem = pem.trim();
    if pem.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| RsaError::Pem(e.to_string()))
    } else {
        RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| RsaError::Pem(e.to_string()))
    }
}

pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, RsaError> {
    let pem = pem.trim();
    if pem.contains("BEGIN RSA PUBLIC KEY") {
        RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| RsaError::Pem(e.to_string()))
    } else {
        RsaPublicKey::from_public_key_pem(pem).map_err(|e| RsaError::Pem(e.to_string()))
    }
}

pub fn encrypt(key: &RsaPublicKey, data: &[u8], padding: RsaPadding) -> Result<Vec<u8>, RsaError> {
    let mut rng = rand::thread_rng();
    let out = match padding {
        RsaPadding::Pkcs1v15 => key.encrypt(&mut rng, Pkcs1v15Encrypt, data)?,
        RsaPadding::OaepSha1 => key.encrypt(&mut rng, Oaep::new::<Sha1>(), data)?,
    };
    Ok(out)
}

pub fn decrypt(key: &RsaPrivateKey, data: &[u8], padding: RsaPadding) -> Result<Vec<u8>, RsaError> {
    let out = match padding {
        RsaPadding::Pkcs1v15 => key.decrypt(Pkcs1v15Encrypt, data)?,
        RsaPadding::OaepSha1 => key.decrypt(Oaep::new::<Sha1>(), data)?,
    };
    Ok(out)
}

/// Encrypt with a PEM public key and return base64.
pub fn encrypt_pem_b64(
    public_pem: &str,
    data: &[u8],
    padding: RsaPadding,
) -> Result<String, RsaError> {
    let key = parse_public_key(public_pem)?;
    Ok(BASE64.encode(encrypt(&key, data, padding)?))
}

/// Decrypt base64 ciphertext with a PEM private key.
pub fn decrypt_pem_b64(
    private_pem: &str,
    cipher_b64: &str,
    padding: RsaPadding,
) -> Result<Vec<u8>, RsaError> {
    let key = parse_private_key(private_pem)?;
    let cipher = BASE64
        .decode(cipher_b64.trim())
        .map_err(|e| RsaError::Base64(e.to_string()))?;
    decrypt(&key, &cipher, padding)
}

/// SHA256withRSA signature.
pub fn sign_sha256(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, RsaError> {
    let hashed = Sha256::digest(data);
    Ok(key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)?)
}

pub fn verify_sha256(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<(), RsaError> {
    let hashed = Sha256::digest(data);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)?;
    Ok(())
}
