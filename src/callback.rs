//! Callback verification and message crypto.
//!
//! Features:
//! - Signature verification (SHA1 over lexicographically sorted parts)
//! - Encrypted URL verification (`echostr`) and OA plaintext verification
//! - XML/JSON wrapper extraction of the `Encrypt` field
//! - Encrypted passive replies (`Encrypt`, `MsgSignature`, `TimeStamp`, `Nonce`)
//!
//! ```ignore
//! use wxkit_rs::callback::{CallbackConfig, CallbackCrypto};
//!
//! let crypto = CallbackCrypto::new(CallbackConfig::from_env("WXKIT_CALLBACK")?)?;
//! // GET: URL verification
//! let echo = crypto.verify_echostr(&timestamp, &nonce, &msg_signature, &echostr)?;
//! // POST: event delivery
//! let xml = crypto.decrypt_body(&timestamp, &nonce, &msg_signature, &body)?;
//! let reply = crypto.encrypt_reply(&answer_xml, &timestamp, &nonce)?;
//! let response_body = reply.to_xml();
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cipher::CryptoError;
use crate::client::id_hint;
use crate::envelope::{self, AesKey, NONCE_LEN};
use crate::keygen;
use crate::sign::sha1_hex;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("missing Encrypt field")]
    MissingEncrypt,
    #[error("xml error: {0}")]
    Xml(String),
    #[error("json parse error: {0}")]
    Json(String),
    #[error("invalid callback config: {0}")]
    Config(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Compute SHA1 signature by sorting parts lexicographically and concatenating.
pub fn sha1_signature(parts: &[&str]) -> String {
    let mut v = parts.to_vec();
    v.sort_unstable();
    sha1_hex(v.concat().as_bytes())
}

/// Verify URL signature (no encrypt parameter).
pub fn verify_url_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    sha1_signature(&[token, timestamp, nonce]).eq_ignore_ascii_case(signature)
}

/// Verify message signature (includes encrypt parameter).
pub fn verify_msg_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    encrypt: &str,
    signature: &str,
) -> bool {
    sha1_signature(&[token, timestamp, nonce, encrypt]).eq_ignore_ascii_case(signature)
}

/// OA plaintext-mode URL verification: returns `echostr` when the signature
/// matches.
pub fn verify_plain_echostr(
    token: &str,
    timestamp: &str,
    nonce: &str,
    signature: &str,
    echostr: &str,
) -> Result<String, CallbackError> {
    if verify_url_signature(token, timestamp, nonce, signature) {
        Ok(echostr.to_string())
    } else {
        Err(CallbackError::SignatureMismatch)
    }
}

/// Callback wrapper format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFormat {
    Xml,
    Json,
}

pub fn detect_format(body: &str) -> CallbackFormat {
    let s = body.trim_start();
    if s.starts_with('{') || s.starts_with('[') {
        CallbackFormat::Json
    } else {
        CallbackFormat::Xml
    }
}

#[derive(Debug, Deserialize)]
struct EncryptedXml {
    #[serde(rename = "Encrypt")]
    encrypt: Option<String>,
}

/// Extract the `Encrypt` field from an XML wrapper (CDATA or plain text).
pub fn extract_encrypt_from_xml(xml: &str) -> Result<String, CallbackError> {
    let wrapper: EncryptedXml =
        quick_xml::de::from_str(xml).map_err(|e| CallbackError::Xml(e.to_string()))?;
    wrapper
        .encrypt
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(CallbackError::MissingEncrypt)
}

/// Extract `Encrypt` (or `encrypt`) from a JSON wrapper.
pub fn extract_encrypt_from_json(body: &str) -> Result<String, CallbackError> {
    let v: serde_json::Value =
        serde_json::from_str(body).map_err(|e| CallbackError::Json(e.to_string()))?;
    v.get("Encrypt")
        .or_else(|| v.get("encrypt"))
        .and_then(|x| x.as_str())
        .map(str::to_string)
        .ok_or(CallbackError::MissingEncrypt)
}

/// Extract `Encrypt` from either wrapper format.
pub fn extract_encrypt(body: &str) -> Result<String, CallbackError> {
    match detect_format(body) {
        CallbackFormat::Xml => extract_encrypt_from_xml(body),
        CallbackFormat::Json => extract_encrypt_from_json(body),
    }
}

/// Deserialize a decrypted XML message into `T`.
pub fn parse_xml<T: DeserializeOwned>(xml: &str) -> Result<T, CallbackError> {
    quick_xml::de::from_str(xml).map_err(|e| CallbackError::Xml(e.to_string()))
}

/// Fields shared by every callback message and event. Type-specific fields
/// are left to the caller's own struct via [`parse_xml`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackMessage {
    pub to_user_name: String,
    pub from_user_name: String,
    #[serde(default)]
    pub create_time: i64,
    pub msg_type: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub msg_id: Option<i64>,
    #[serde(rename = "AgentID", default)]
    pub agent_id: Option<String>,
}

/// Callback credentials from the vendor console.
#[derive(Clone, Deserialize)]
pub struct CallbackConfig {
    /// 1..=32 alphanumeric characters
    pub token: String,
    /// 43 characters, base64 of a 32-byte key without the trailing `=`
    pub encoding_aes_key: String,
    /// corpid / appid embedded in every envelope. Empty skips the check on
    /// decrypt but makes [`CallbackCrypto::encrypt_reply`] fail.
    #[serde(default)]
    pub receiver_id: String,
}

impl std::fmt::Debug for CallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackConfig")
            .field("token", &"[redacted]")
            .field("encoding_aes_key", &"[redacted]")
            .field("receiver_id", &self.receiver_id)
            .finish()
    }
}

impl CallbackConfig {
    pub fn new(
        token: impl Into<String>,
        encoding_aes_key: impl Into<String>,
        receiver_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            encoding_aes_key: encoding_aes_key.into(),
            receiver_id: receiver_id.into(),
        }
    }

    /// Read `{PREFIX}_TOKEN`, `{PREFIX}_ENCODING_AES_KEY` and the optional
    /// `{PREFIX}_RECEIVER_ID`.
    pub fn from_env(prefix: &str) -> Result<Self, CallbackError> {
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            std::env::var(&key).map_err(|_| CallbackError::Config(format!("{key} is not set")))
        };
        let cfg = Self {
            token: var("TOKEN")?,
            encoding_aes_key: var("ENCODING_AES_KEY")?,
            receiver_id: var("RECEIVER_ID").unwrap_or_default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CallbackError> {
        let t = &self.token;
        if t.is_empty() || t.len() > 32 || !t.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CallbackError::Config(
                "token must be 1..=32 alphanumeric characters".into(),
            ));
        }
        if !keygen::verify_encoding_aes_key(&self.encoding_aes_key) {
            return Err(CallbackError::Config(
                "encoding_aes_key must be 43 characters decoding to 32 bytes".into(),
            ));
        }
        Ok(())
    }
}

/// Encrypted passive reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptedReply {
    pub encrypt: String,
    pub msg_signature: String,
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    pub nonce: String,
}

impl EncryptedReply {
    pub fn to_xml(&self) -> String {
        format!(
            "<xml>\n\
             <Encrypt><![CDATA[{}]]></Encrypt>\n\
             <MsgSignature><![CDATA[{}]]></MsgSignature>\n\
             <TimeStamp>{}</TimeStamp>\n\
             <Nonce><![CDATA[{}]]></Nonce>\n\
             </xml>",
            self.encrypt, self.msg_signature, self.timestamp, self.nonce
        )
    }

    /// JSON form for callbacks configured with the JSON data format.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Verifies and decrypts callbacks for one (token, key, receiver id) triple.
#[derive(Clone)]
pub struct CallbackCrypto {
    token: String,
    key: AesKey,
    receiver_id: String,
}

impl std::fmt::Debug for CallbackCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackCrypto")
            .field("receiver_id", &self.receiver_id)
            .finish_non_exhaustive()
    }
}

impl CallbackCrypto {
    pub fn new(config: CallbackConfig) -> Result<Self, CallbackError> {
        config.validate()?;
        let key = AesKey::from_encoding_aes_key(&config.encoding_aes_key)?;
        Ok(Self {
            token: config.token,
            key,
            receiver_id: config.receiver_id,
        })
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    /// Encrypted URL verification (GET): verify, decrypt, return the echo.
    pub fn verify_echostr(
        &self,
        timestamp: &str,
        nonce: &str,
        msg_signature: &str,
        echostr: &str,
    ) -> Result<String, CallbackError> {
        self.check_signature(timestamp, nonce, echostr, msg_signature)?;
        self.open(echostr)
    }

    /// Verify and decrypt a POST body in the XML or JSON wrapper.
    pub fn decrypt_body(
        &self,
        timestamp: &str,
        nonce: &str,
        msg_signature: &str,
        body: &str,
    ) -> Result<String, CallbackError> {
        let encrypt = extract_encrypt(body)?;
        self.check_signature(timestamp, nonce, &encrypt, msg_signature)?;
        self.open(&encrypt)
    }

    /// Encrypt a passive reply and sign it.
    pub fn encrypt_reply(
        &self,
        payload: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<EncryptedReply, CallbackError> {
        if self.receiver_id.is_empty() {
            return Err(CallbackError::Config(
                "receiver_id is required to encrypt replies".into(),
            ));
        }
        let random = random_nonce();
        let encrypt =
            envelope::build_b64(&self.receiver_id, &self.key, &random, payload.as_bytes())?;
        let msg_signature = sha1_signature(&[&self.token, timestamp, nonce, &encrypt]);
        Ok(EncryptedReply {
            encrypt,
            msg_signature,
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
        })
    }

    fn check_signature(
        &self,
        timestamp: &str,
        nonce: &str,
        encrypt: &str,
        msg_signature: &str,
    ) -> Result<(), CallbackError> {
        if verify_msg_signature(&self.token, timestamp, nonce, encrypt, msg_signature) {
            Ok(())
        } else {
            warn!(timestamp, "callback signature mismatch");
            Err(CallbackError::SignatureMismatch)
        }
    }

    fn open(&self, encrypt: &str) -> Result<String, CallbackError> {
        let receiver_id = if self.receiver_id.is_empty() {
            envelope::peek_receiver_id(&self.key, encrypt)?
        } else {
            self.receiver_id.clone()
        };
        let payload = envelope::parse(&receiver_id, &self.key, encrypt)?;
        debug!(receiver = %id_hint(&receiver_id), len = payload.len(), "callback decrypted");
        String::from_utf8(payload).map_err(|e| CryptoError::Utf8(e.to_string()).into())
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(keygen::generate_nonce().as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "QDG6eK";
    const KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C";
    const CORP_ID: &str = "wx5823bf96d3bd56c7";

    fn crypto() -> CallbackCrypto {
        CallbackCrypto::new(CallbackConfig::new(TOKEN, KEY, CORP_ID)).unwrap()
    }

    #[test]
    fn signature_sorts_parts() {
        let a = sha1_signature(&["b", "a", "c"]);
        assert_eq!(a, sha1_hex(b"abc"));
        assert_eq!(a, sha1_signature(&["c", "b", "a"]));
    }

    #[test]
    fn url_signature_ignores_hex_case() {
        let sig = sha1_signature(&[TOKEN, "1409659589", "263014780"]);
        assert!(verify_url_signature(TOKEN, "1409659589", "263014780", &sig));
        assert!(verify_url_signature(
            TOKEN,
            "1409659589",
            "263014780",
            &sig.to_uppercase()
        ));
        assert!(!verify_url_signature(TOKEN, "1409659590", "263014780", &sig));
    }

    #[test]
    fn plain_echostr() {
        let sig = sha1_signature(&[TOKEN, "1", "2"]);
        assert_eq!(verify_plain_echostr(TOKEN, "1", "2", &sig, "hello").unwrap(), "hello");
        assert!(matches!(
            verify_plain_echostr(TOKEN, "1", "3", &sig, "hello"),
            Err(CallbackError::SignatureMismatch)
        ));
    }

    #[test]
    fn extracts_encrypt_from_both_wrappers() {
        let xml = "<xml><ToUserName><![CDATA[toUser]]></ToUserName>\
                   <AgentID><![CDATA[218]]></AgentID>\
                   <Encrypt><![CDATA[abc+/=]]></Encrypt></xml>";
        assert_eq!(extract_encrypt(xml).unwrap(), "abc+/=");
        assert_eq!(
            extract_encrypt("<xml><Encrypt>plain</Encrypt></xml>").unwrap(),
            "plain"
        );
        assert_eq!(
            extract_encrypt(r#"{"ToUserName":"x","Encrypt":"j1"}"#).unwrap(),
            "j1"
        );
        assert_eq!(extract_encrypt(r#"{"encrypt":"j2"}"#).unwrap(), "j2");
        assert!(matches!(
            extract_encrypt("<xml><ToUserName>x</ToUserName></xml>"),
            Err(CallbackError::MissingEncrypt)
        ));
        assert!(matches!(
            extract_encrypt(r#"{"x":1}"#),
            Err(CallbackError::MissingEncrypt)
        ));
    }

    #[test]
    fn config_validation() {
        assert!(CallbackConfig::new(TOKEN, KEY, CORP_ID).validate().is_ok());
        assert!(matches!(
            CallbackConfig::new("", KEY, CORP_ID).validate(),
            Err(CallbackError::Config(_))
        ));
        assert!(matches!(
            CallbackConfig::new("bad token!", KEY, CORP_ID).validate(),
            Err(CallbackError::Config(_))
        ));
        assert!(matches!(
            CallbackConfig::new(TOKEN, "short", CORP_ID).validate(),
            Err(CallbackError::Config(_))
        ));
    }

    #[test]
    fn config_from_env() {
        // SAFETY: the variable names are unique to this test.
        unsafe {
            std::env::set_var("WXKIT_CBTEST_TOKEN", TOKEN);
            std::env::set_var("WXKIT_CBTEST_ENCODING_AES_KEY", KEY);
            std::env::set_var("WXKIT_CBTEST_RECEIVER_ID", CORP_ID);
        }
        let cfg = CallbackConfig::from_env("WXKIT_CBTEST").unwrap();
        assert_eq!(cfg.receiver_id, CORP_ID);
        assert!(!format!("{cfg:?}").contains(KEY));
        assert!(matches!(
            CallbackConfig::from_env("WXKIT_CBTEST_MISSING"),
            Err(CallbackError::Config(_))
        ));
    }

    #[test]
    fn reply_roundtrip_through_decrypt_body() {
        let c = crypto();
        let payload = "<xml><ToUserName><![CDATA[u]]></ToUserName><Content><![CDATA[你好]]></Content></xml>";
        let reply = c.encrypt_reply(payload, "1409659813", "1372623149").unwrap();
        assert_eq!(
            reply.msg_signature,
            sha1_signature(&[TOKEN, "1409659813", "1372623149", &reply.encrypt])
        );

        let xml = reply.to_xml();
        assert!(xml.contains("<TimeStamp>1409659813</TimeStamp>"));
        let out = c
            .decrypt_body("1409659813", "1372623149", &reply.msg_signature, &xml)
            .unwrap();
        assert_eq!(out, payload);

        let json = reply.to_json();
        assert!(json.contains(r#""TimeStamp":"1409659813""#));
        let out = c
            .decrypt_body("1409659813", "1372623149", &reply.msg_signature, &json)
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn echostr_roundtrip_and_tamper() {
        let c = crypto();
        let key = AesKey::from_encoding_aes_key(KEY).unwrap();
        let echostr = envelope::build_b64(CORP_ID, &key, b"0123456789abcdef", b"1616140317555161061")
            .unwrap();
        let sig = sha1_signature(&[TOKEN, "1409659589", "263014780", &echostr]);
        assert_eq!(
            c.verify_echostr("1409659589", "263014780", &sig, &echostr).unwrap(),
            "1616140317555161061"
        );
        assert!(matches!(
            c.verify_echostr("1409659589", "263014781", &sig, &echostr),
            Err(CallbackError::SignatureMismatch)
        ));
    }

    #[test]
    fn foreign_receiver_is_rejected_and_empty_receiver_peeks() {
        let key = AesKey::from_encoding_aes_key(KEY).unwrap();
        let encrypt = envelope::build_b64("wwother", &key, &[9u8; 16], b"<xml/>").unwrap();
        let sig = sha1_signature(&[TOKEN, "1", "2", &encrypt]);
        let body = format!("<xml><Encrypt><![CDATA[{encrypt}]]></Encrypt></xml>");

        let err = crypto().decrypt_body("1", "2", &sig, &body).unwrap_err();
        assert!(matches!(
            err,
            CallbackError::Crypto(CryptoError::ReceiverIdMismatch { .. })
        ));

        let open = CallbackCrypto::new(CallbackConfig::new(TOKEN, KEY, "")).unwrap();
        assert_eq!(open.decrypt_body("1", "2", &sig, &body).unwrap(), "<xml/>");
        assert!(matches!(
            open.encrypt_reply("<xml/>", "1", "2"),
            Err(CallbackError::Config(_))
        ));
    }

    #[test]
    fn parses_common_message_fields() {
        let xml = "<xml><ToUserName><![CDATA[ww1]]></ToUserName>\
                   <FromUserName><![CDATA[sys]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[event]]></MsgType>\
                   <Event><![CDATA[kf_msg_or_event]]></Event>\
                   <Token><![CDATA[ENCApHxnGDNAVNY4AaSJKj4Tb5mwsEMzxhFmHVGcra996NR]]></Token>\
                   </xml>";
        let msg: CallbackMessage = parse_xml(xml).unwrap();
        assert_eq!(msg.to_user_name, "ww1");
        assert_eq!(msg.create_time, 1348831860);
        assert_eq!(msg.msg_type, "event");
        assert_eq!(msg.event.as_deref(), Some("kf_msg_or_event"));
        assert!(msg.content.is_none());
    }
}
