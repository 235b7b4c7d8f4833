//! Callback credential generation.
//!
//! - Token: alphanumeric, default 32 chars (max 32), used for SHA1 signatures.
//! - EncodingAESKey: 43 alphanumeric chars; base64-decodes to 32 bytes once a
//!   single `=` is appended.
//! - Nonce: 16 alphanumeric chars, the random prefix of an envelope or the
//!   `nonce` query parameter of a signed request.
//!
//! Entropy comes from `rand::thread_rng()` (a CSPRNG seeded by the OS).

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::envelope::AesKey;

const MAX_TOKEN_LEN: usize = 32;
const ENCODING_AES_KEY_LEN: usize = 43;

fn alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Alphanumeric Token; `len` outside 1..=32 yields 32 chars.
pub fn generate_token(len: usize) -> String {
    let len = if len == 0 || len > MAX_TOKEN_LEN {
        MAX_TOKEN_LEN
    } else {
        len
    };
    alphanumeric(len)
}

/// 43-character EncodingAESKey over 32 random bytes.
///
/// The console only accepts letters and digits, so encodings containing `+`
/// or `/` are rejected and redrawn.
pub fn generate_encoding_aes_key() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let mut key_bytes = [0u8; 32];
        rng.fill_bytes(&mut key_bytes);
        let b64 = BASE64.encode(key_bytes);
        let trimmed = b64.trim_end_matches('=');
        if trimmed.len() == ENCODING_AES_KEY_LEN
            && trimmed.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return trimmed.to_string();
        }
    }
}

/// Exactly 43 characters decoding to a 32-byte key.
pub fn verify_encoding_aes_key(key: &str) -> bool {
    key.len() == ENCODING_AES_KEY_LEN
        && AesKey::from_encoding_aes_key(key)
            .map(|k| k.as_bytes().len() == 32)
            .unwrap_or(false)
}

/// 16 alphanumeric characters.
pub fn generate_nonce() -> String {
    alphanumeric(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_alnum_and_length() {
        for len in [8usize, 16, 32] {
            let t = generate_token(len);
            assert_eq!(t.len(), len);
            assert!(t.chars().all(|ch| ch.is_ascii_alphanumeric()));
        }
        // length above max clamps to 32
        assert_eq!(generate_token(64).len(), 32);
        // length 0 defaults to 32
        assert_eq!(generate_token(0).len(), 32);
    }

    #[test]
    fn encoding_aes_key_generation_and_verify() {
        let key = generate_encoding_aes_key();
        assert_eq!(key.len(), 43);
        assert!(key.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert!(verify_encoding_aes_key(&key));

        let raw = BASE64.decode(format!("{key}=")).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn console_issued_keys_verify() {
        // Vendor sample keys carry non-zero trailing bits.
        assert!(verify_encoding_aes_key(
            "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C"
        ));
        assert!(!verify_encoding_aes_key("too-short"));
        assert!(!verify_encoding_aes_key(&"A".repeat(44)));
        assert!(!verify_encoding_aes_key(&"*".repeat(43)));
    }

    #[test]
    fn nonce_shape() {
        let n = generate_nonce();
        assert_eq!(n.len(), 16);
        assert!(n.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(n, generate_nonce());
    }
}
