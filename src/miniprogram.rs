//! Mini Program login and `encryptedData` decryption.
//!
//! `wx.login()` yields a single-use `js_code`; the server exchanges it for a
//! `session_key` ([`Client::code_to_session`]). Sensitive payloads from the
//! client (phone number, user info) arrive as `encryptedData` + `iv`, both
//! base64, encrypted with AES-128-CBC under the session key. The decrypted
//! JSON carries `watermark.appid`, which must equal the caller's appid.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::cipher::{AesCbc, CryptoError};
use crate::client::{Action, Client, Result, id_hint};
use crate::envelope::decode_b64_lenient;
use crate::padding::Padding;

pub const CODE2SESSION_URL: &str = "https://api.weixin.qq.com/sns/jscode2session";

#[derive(Clone, Deserialize)]
pub struct Session {
    pub openid: String,
    pub session_key: String,
    #[serde(default)]
    pub unionid: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("openid", &self.openid)
            .field("session_key", &"[redacted]")
            .field("unionid", &self.unionid)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Watermark {
    pub appid: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Decrypted `getPhoneNumber` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    pub phone_number: String,
    pub pure_phone_number: String,
    pub country_code: String,
    pub watermark: Watermark,
}

impl Client {
    /// Exchange a login code for `openid` and `session_key`.
    #[instrument(level = "debug", skip(self, secret, js_code))]
    pub async fn code_to_session(&self, appid: &str, secret: &str, js_code: &str) -> Result<Session> {
        let action = Action::get(CODE2SESSION_URL)
            .query("appid", appid)
            .query("secret", secret)
            .query("js_code", js_code)
            .query("grant_type", "authorization_code");
        debug!(appid = %id_hint(appid), "exchanging js_code");
        self.call_wx(&action).await
    }
}

/// Decrypt `encryptedData` and check the watermark appid.
pub fn decrypt_user_data<T: DeserializeOwned>(
    session_key_b64: &str,
    encrypted_data_b64: &str,
    iv_b64: &str,
    expected_appid: &str,
) -> std::result::Result<T, CryptoError> {
    let key = decode_b64_lenient(session_key_b64)?;
    let iv = decode_b64_lenient(iv_b64)?;
    let cipher = decode_b64_lenient(encrypted_data_b64)?;

    let plain = AesCbc::new(&key, &iv, Padding::Pkcs7)?.decrypt(&cipher)?;
    let value: serde_json::Value =
        serde_json::from_slice(&plain).map_err(|e| CryptoError::Json(e.to_string()))?;

    let actual = value
        .pointer("/watermark/appid")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if actual != expected_appid {
        return Err(CryptoError::AppIdMismatch {
            expected: expected_appid.to_string(),
            actual: actual.to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| CryptoError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

    const APPID: &str = "wx4f4bc4dec97d474b";

    fn seal(key: &[u8; 16], iv: &[u8; 16], json: &str) -> (String, String, String) {
        let cipher = AesCbc::new(key, iv, Padding::Pkcs7)
            .unwrap()
            .encrypt(json.as_bytes())
            .unwrap();
        (BASE64.encode(key), BASE64.encode(cipher), BASE64.encode(iv))
    }

    #[test]
    fn decrypts_phone_number() {
        let json = format!(
            r#"{{"phoneNumber":"+86 13800138000","purePhoneNumber":"13800138000","countryCode":"86","watermark":{{"appid":"{APPID}","timestamp":1477314187}}}}"#
        );
        let (key, data, iv) = seal(&[1u8; 16], &[2u8; 16], &json);
        let phone: PhoneNumber = decrypt_user_data(&key, &data, &iv, APPID).unwrap();
        assert_eq!(phone.pure_phone_number, "13800138000");
        assert_eq!(phone.watermark.timestamp, 1477314187);
    }

    #[test]
    fn watermark_mismatch_is_rejected() {
        let json = r#"{"nickName":"Band","watermark":{"appid":"wxother","timestamp":1}}"#;
        let (key, data, iv) = seal(&[3u8; 16], &[4u8; 16], json);
        let err = decrypt_user_data::<serde_json::Value>(&key, &data, &iv, APPID).unwrap_err();
        assert_eq!(
            err,
            CryptoError::AppIdMismatch {
                expected: APPID.into(),
                actual: "wxother".into()
            }
        );
    }

    #[test]
    fn missing_watermark_is_rejected() {
        let (key, data, iv) = seal(&[5u8; 16], &[6u8; 16], r#"{"nickName":"Band"}"#);
        assert!(matches!(
            decrypt_user_data::<serde_json::Value>(&key, &data, &iv, APPID),
            Err(CryptoError::AppIdMismatch { .. })
        ));
    }

    #[test]
    fn bad_iv_length_fails_loudly() {
        let (key, data, _) = seal(&[7u8; 16], &[8u8; 16], "{}");
        let short_iv = BASE64.encode([0u8; 8]);
        assert!(matches!(
            decrypt_user_data::<serde_json::Value>(&key, &data, &short_iv, APPID),
            Err(CryptoError::IvLengthMismatch {
                expected: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn wrong_session_key_does_not_yield_data() {
        let json = format!(r#"{{"watermark":{{"appid":"{APPID}"}}}}"#);
        let (_, data, iv) = seal(&[9u8; 16], &[1u8; 16], &json);
        let other = BASE64.encode([0xAAu8; 16]);
        assert!(decrypt_user_data::<serde_json::Value>(&other, &data, &iv, APPID).is_err());
    }

    #[test]
    fn session_debug_hides_key() {
        let s: Session =
            serde_json::from_str(r#"{"openid":"o1","session_key":"SK"}"#).unwrap();
        assert!(!format!("{s:?}").contains("SK"));
    }
}
