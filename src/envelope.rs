//! Callback message envelope.
//!
//! Plaintext layout before encryption:
//!
//! ```text
//! nonce (16B) | payload length (u32, big-endian) | payload | receiver_id
//! ```
//!
//! The buffer is AES-CBC encrypted with `iv = key[..16]` and PKCS#7 padding
//! sized to the key length. After decryption the trailing receiver id (corpid
//! or appid) is compared against the expected value; a mismatch is a hard
//! integrity failure.

use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use crate::cipher::{AES_BLOCK_SIZE, AesCbc, CryptoError};
use crate::padding::Padding;

/// Length of the random prefix.
pub const NONCE_LEN: usize = 16;
const HEADER_LEN: usize = NONCE_LEN + 4;

// Vendor consoles issue keys whose last symbol carries non-zero trailing bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Raw AES key for the callback envelope (16, 24 or 32 bytes).
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey(Vec<u8>);

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AesKey({} bytes)", self.0.len())
    }
}

impl AesKey {
    pub fn new(bytes: &[u8]) -> Result<Self, CryptoError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes.to_vec())),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    /// Decode a vendor EncodingAESKey.
    ///
    /// The stored key is unpadded base64 (43 chars for AES-256); one `=` is
    /// appended before decoding when missing.
    pub fn from_encoding_aes_key(encoding_aes_key: &str) -> Result<Self, CryptoError> {
        let trimmed = encoding_aes_key.trim();
        let key_b64 = if trimmed.ends_with('=') {
            trimmed.to_string()
        } else {
            format!("{trimmed}=")
        };
        let raw = KEY_ENGINE
            .decode(key_b64.as_bytes())
            .map_err(|e| CryptoError::Base64(e.to_string()))?;
        Self::new(&raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The envelope IV: the first block of the key itself.
    pub fn iv(&self) -> &[u8] {
        &self.0[..AES_BLOCK_SIZE]
    }

    fn codec(&self) -> Result<AesCbc, CryptoError> {
        AesCbc::new(&self.0, self.iv(), Padding::Pkcs7)
    }
}

/// Encrypt `payload` into a raw envelope ciphertext.
pub fn build(
    receiver_id: &str,
    key: &AesKey,
    nonce: &[u8; NONCE_LEN],
    payload: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let content_len = u32::try_from(payload.len()).map_err(|_| CryptoError::BadFormat)?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + receiver_id.len());
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(&content_len.to_be_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(receiver_id.as_bytes());
    key.codec()?.encrypt(&buf)
}

/// [`build`] followed by standard base64, the transport form.
pub fn build_b64(
    receiver_id: &str,
    key: &AesKey,
    nonce: &[u8; NONCE_LEN],
    payload: &[u8],
) -> Result<String, CryptoError> {
    Ok(BASE64.encode(build(receiver_id, key, nonce, payload)?))
}

/// Decode a base64 envelope and return the payload.
///
/// Accepts the URL-safe alphabet and missing `=` padding, which some gateways
/// produce when forwarding the `Encrypt` field.
pub fn parse(receiver_id: &str, key: &AesKey, cipher_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let cipher = decode_b64_lenient(cipher_b64)?;
    parse_bytes(receiver_id, key, &cipher)
}

/// Decrypt a raw envelope ciphertext and return the payload.
pub fn parse_bytes(
    receiver_id: &str,
    key: &AesKey,
    cipher: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let plain = key.codec()?.decrypt(cipher)?;
    if plain.len() < HEADER_LEN + receiver_id.len() {
        return Err(CryptoError::BadFormat);
    }

    let appid_offset = plain.len() - receiver_id.len();
    let tail = &plain[appid_offset..];
    if tail != receiver_id.as_bytes() {
        return Err(CryptoError::ReceiverIdMismatch {
            expected: receiver_id.to_string(),
            actual: String::from_utf8_lossy(tail).into_owned(),
        });
    }

    let declared = u32::from_be_bytes([
        plain[NONCE_LEN],
        plain[NONCE_LEN + 1],
        plain[NONCE_LEN + 2],
        plain[NONCE_LEN + 3],
    ]) as usize;
    if declared != appid_offset - HEADER_LEN {
        return Err(CryptoError::BadFormat);
    }

    Ok(plain[HEADER_LEN..appid_offset].to_vec())
}

/// Extract the receiver id from a decrypted envelope without knowing it in
/// advance, using the length prefix.
pub fn peek_receiver_id(key: &AesKey, cipher_b64: &str) -> Result<String, CryptoError> {
    let cipher = decode_b64_lenient(cipher_b64)?;
    let plain = key.codec()?.decrypt(&cipher)?;
    if plain.len() < HEADER_LEN {
        return Err(CryptoError::BadFormat);
    }
    let declared = u32::from_be_bytes([
        plain[NONCE_LEN],
        plain[NONCE_LEN + 1],
        plain[NONCE_LEN + 2],
        plain[NONCE_LEN + 3],
    ]) as usize;
    let end = HEADER_LEN
        .checked_add(declared)
        .filter(|&end| end <= plain.len())
        .ok_or(CryptoError::BadFormat)?;
    String::from_utf8(plain[end..].to_vec()).map_err(|e| CryptoError::Utf8(e.to_string()))
}

pub(crate) fn decode_b64_lenient(input: &str) -> Result<Vec<u8>, CryptoError> {
    let mut t = input.trim().replace('-', "+").replace('_', "/");
    match t.len() % 4 {
        2 => t.push_str("=="),
        3 => t.push('='),
        _ => {}
    }
    BASE64
        .decode(t.as_bytes())
        .map_err(|e| CryptoError::Base64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODING_AES_KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";
    const CORP_ID: &str = "wx5823bf96d3bd56c7";

    fn key() -> AesKey {
        AesKey::from_encoding_aes_key(ENCODING_AES_KEY).unwrap()
    }

    #[test]
    fn encoding_aes_key_decodes_to_32_bytes() {
        let k = key();
        assert_eq!(k.as_bytes().len(), 32);
        assert_eq!(k.iv(), &k.as_bytes()[..16]);
        // an explicitly padded key decodes identically
        let padded = AesKey::from_encoding_aes_key(&format!("{ENCODING_AES_KEY}=")).unwrap();
        assert_eq!(padded, k);
    }

    #[test]
    fn bad_encoding_aes_key_is_rejected() {
        assert!(matches!(
            AesKey::from_encoding_aes_key("short"),
            Err(CryptoError::Base64(_)) | Err(CryptoError::InvalidKeyLength(_))
        ));
    }

    #[test]
    fn plaintext_layout_matches_envelope() {
        let k = key();
        let nonce = *b"0123456789abcdef";
        let cipher = build(CORP_ID, &k, &nonce, b"<xml/>").unwrap();
        let plain = AesCbc::new(k.as_bytes(), k.iv(), Padding::Pkcs7)
            .unwrap()
            .decrypt(&cipher)
            .unwrap();
        assert_eq!(&plain[..16], &nonce);
        assert_eq!(&plain[16..20], &6u32.to_be_bytes());
        assert_eq!(&plain[20..26], b"<xml/>");
        assert_eq!(&plain[26..], CORP_ID.as_bytes());
    }

    #[test]
    fn roundtrip_for_every_key_size() {
        let nonce = [0x5Au8; NONCE_LEN];
        for key_len in [16usize, 24, 32] {
            let raw: Vec<u8> = (0..key_len).map(|i| (i * 7) as u8).collect();
            let k = AesKey::new(&raw).unwrap();
            let payloads: [&[u8]; 4] = [b"", b"a", b"hello world", &[0u8; 100]];
            for payload in payloads {
                let b64 = build_b64(CORP_ID, &k, &nonce, payload).unwrap();
                assert_eq!(parse(CORP_ID, &k, &b64).unwrap(), payload);
            }
        }
    }

    #[test]
    fn receiver_id_mismatch_is_hard_error() {
        let k = key();
        let b64 = build_b64(CORP_ID, &k, &[1u8; 16], b"payload").unwrap();
        let err = parse("wwsomeoneelse00000", &k, &b64).unwrap_err();
        assert!(matches!(err, CryptoError::ReceiverIdMismatch { .. }));
    }

    #[test]
    fn tampered_ciphertext_never_yields_original() {
        let k = key();
        let payload = b"<xml><Content>hi</Content></xml>";
        let cipher = build(CORP_ID, &k, &[7u8; 16], payload).unwrap();
        // Flips in the final block only garble padding, which is not authenticated.
        for i in 0..cipher.len() - AES_BLOCK_SIZE {
            let mut bad = cipher.clone();
            bad[i] ^= 0x01;
            if let Ok(out) = parse_bytes(CORP_ID, &k, &bad) {
                assert_ne!(out, payload, "byte {i} flip went unnoticed");
            }
        }
    }

    #[test]
    fn wrong_key_fails() {
        let b64 = build_b64(CORP_ID, &key(), &[2u8; 16], b"secret").unwrap();
        let other = AesKey::new(&[0x42u8; 32]).unwrap();
        assert!(parse(CORP_ID, &other, &b64).is_err());
    }

    #[test]
    fn url_safe_and_unpadded_base64_is_accepted() {
        let k = key();
        let b64 = build_b64(CORP_ID, &k, &[3u8; 16], b"x").unwrap();
        let mangled = b64.replace('+', "-").replace('/', "_");
        let mangled = mangled.trim_end_matches('=');
        assert_eq!(parse(CORP_ID, &k, mangled).unwrap(), b"x");
    }

    #[test]
    fn peek_returns_embedded_receiver_id() {
        let k = key();
        let b64 = build_b64(CORP_ID, &k, &[4u8; 16], b"body").unwrap();
        assert_eq!(peek_receiver_id(&k, &b64).unwrap(), CORP_ID);
    }
}
