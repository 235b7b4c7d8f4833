//! Digest and HMAC helpers shared by the vendor signers.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 tag.
pub fn hmac_sha256(data: &[u8], secret: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 as lowercase hex (callback signature form).
pub fn hmac_sha256_hex(data: &[u8], secret: &[u8]) -> String {
    hex::encode(hmac_sha256(data, secret))
}

/// HMAC-SHA256 as standard base64 (E-sign signature form).
pub fn hmac_sha256_base64(data: &[u8], secret: &[u8]) -> String {
    BASE64.encode(hmac_sha256(data, secret))
}

/// Compare against a hex signature. The comparison is case-sensitive: an
/// upper-case signature does not match.
pub fn verify_hmac_sha256_hex(data: &[u8], secret: &[u8], signature: &str) -> bool {
    let expected = hmac_sha256_hex(data, secret);
    expected.len() == signature.len()
        && expected
            .bytes()
            .zip(signature.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Lowercase hex SHA1.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Lowercase hex SHA256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercase hex MD5.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Base64 MD5, the `Content-MD5` header value.
pub fn content_md5(body: &[u8]) -> String {
    BASE64.encode(Md5::digest(body))
}
