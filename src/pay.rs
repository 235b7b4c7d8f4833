//! WeChat Pay signing and notification decryption.
//!
//! v3 (JSON):
//! - Requests carry `Authorization: WECHATPAY2-SHA256-RSA2048 ...`, a
//!   SHA256withRSA signature over `METHOD\nPATH\nTIMESTAMP\nNONCE\nBODY\n`.
//! - Notifications carry an `AEAD_AES_256_GCM` resource keyed by the APIv3 key.
//! - Responses and notifications are signed by the platform over
//!   `TIMESTAMP\nNONCE\nBODY\n`.
//!
//! v2 (XML): parameters sorted by key, empty values and `sign` skipped,
//! `&key=API_KEY` appended, digested with MD5 or HMAC-SHA256, upper-case hex.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cipher::CryptoError;
use crate::client::{Action, Error, Result, unix_secs};
use crate::keygen::generate_nonce;
use crate::rsa_cipher::{self, RsaError};
use crate::sign::{hmac_sha256_hex, md5_hex};

pub const AUTH_SCHEMA: &str = "WECHATPAY2-SHA256-RSA2048";
const GCM_NONCE_LEN: usize = 12;

/// Merchant credentials.
#[derive(Clone, Deserialize)]
pub struct PayConfig {
    pub mch_id: String,
    /// Serial number of the merchant API certificate
    pub serial_no: String,
    pub private_key_pem: String,
    /// 32-byte APIv3 key
    pub api_v3_key: String,
}

impl std::fmt::Debug for PayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayConfig")
            .field("mch_id", &self.mch_id)
            .field("serial_no", &self.serial_no)
            .finish_non_exhaustive()
    }
}

/// JSAPI / Mini Program `requestPayment` parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeParams {
    pub app_id: String,
    pub time_stamp: String,
    pub nonce_str: String,
    pub package: String,
    pub sign_type: String,
    pub pay_sign: String,
}

/// Signs v3 requests for one merchant.
#[derive(Clone)]
pub struct PaySigner {
    mch_id: String,
    serial_no: String,
    key: RsaPrivateKey,
}

impl std::fmt::Debug for PaySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaySigner")
            .field("mch_id", &self.mch_id)
            .field("serial_no", &self.serial_no)
            .finish_non_exhaustive()
    }
}

impl PaySigner {
    pub fn new(config: &PayConfig) -> std::result::Result<Self, RsaError> {
        Ok(Self {
            mch_id: config.mch_id.clone(),
            serial_no: config.serial_no.clone(),
            key: rsa_cipher::parse_private_key(&config.private_key_pem)?,
        })
    }

    /// `METHOD\nPATH\nTIMESTAMP\nNONCE\nBODY\n`
    pub fn message(method: &str, path_with_query: &str, timestamp: u64, nonce: &str, body: &str) -> String {
        format!("{method}\n{path_with_query}\n{timestamp}\n{nonce}\n{body}\n")
    }

    /// Base64 SHA256withRSA signature over `message`.
    pub fn sign(&self, message: &str) -> std::result::Result<String, RsaError> {
        Ok(BASE64.encode(rsa_cipher::sign_sha256(&self.key, message.as_bytes())?))
    }

    /// Value of the `Authorization` header.
    pub fn authorization(
        &self,
        method: &str,
        path_with_query: &str,
        body: &str,
        timestamp: u64,
        nonce: &str,
    ) -> std::result::Result<String, RsaError> {
        let signature = self.sign(&Self::message(
            &method.to_ascii_uppercase(),
            path_with_query,
            timestamp,
            nonce,
            body,
        ))?;
        Ok(format!(
            r#"{AUTH_SCHEMA} mchid="{}",nonce_str="{nonce}",signature="{signature}",timestamp="{timestamp}",serial_no="{}""#,
            self.mch_id, self.serial_no
        ))
    }

    /// Add `Authorization` and `Accept` to an [`Action`] using the current clock.
    pub fn sign_action(&self, action: &mut Action) -> Result<()> {
        let target = action.path_and_query()?;
        let body = action.body.bytes();
        let body = std::str::from_utf8(&body)
            .map_err(|e| Error::Encode(format!("v3 body must be utf-8: {e}")))?;
        let auth = self.authorization(
            action.method.as_str(),
            &target,
            body,
            unix_secs(),
            &generate_nonce(),
        )?;
        let value = HeaderValue::from_str(&auth).map_err(|e| Error::InvalidHeader(e.to_string()))?;
        action.headers.insert(AUTHORIZATION, value);
        action
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        debug!(target = %target, "wechat pay request signed");
        Ok(())
    }

    /// Parameters for `wx.requestPayment` after a JSAPI prepay.
    pub fn bridge_params(
        &self,
        app_id: &str,
        prepay_id: &str,
        timestamp: u64,
        nonce: &str,
    ) -> std::result::Result<BridgeParams, RsaError> {
        let package = format!("prepay_id={prepay_id}");
        let pay_sign = self.sign(&format!("{app_id}\n{timestamp}\n{nonce}\n{package}\n"))?;
        Ok(BridgeParams {
            app_id: app_id.to_string(),
            time_stamp: timestamp.to_string(),
            nonce_str: nonce.to_string(),
            package,
            sign_type: "RSA".to_string(),
            pay_sign,
        })
    }
}

/// Verify a platform signature (`Wechatpay-Signature` header) over
/// `TIMESTAMP\nNONCE\nBODY\n`.
pub fn verify_platform_signature(
    platform_key: &RsaPublicKey,
    timestamp: &str,
    nonce: &str,
    body: &str,
    signature_b64: &str,
) -> std::result::Result<(), RsaError> {
    let signature = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| RsaError::Base64(e.to_string()))?;
    let message = format!("{timestamp}\n{nonce}\n{body}\n");
    rsa_cipher::verify_sha256(platform_key, message.as_bytes(), &signature)
}

/// Encrypted part of a v3 notification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationResource {
    pub algorithm: String,
    pub ciphertext: String,
    #[serde(default)]
    pub associated_data: String,
    pub nonce: String,
    #[serde(default)]
    pub original_type: String,
}

/// v3 notification body.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: String,
    pub create_time: String,
    pub event_type: String,
    pub resource_type: String,
    pub resource: NotificationResource,
    #[serde(default)]
    pub summary: String,
}

/// Decrypt an `AEAD_AES_256_GCM` resource with the APIv3 key.
///
/// The ciphertext is base64 of `encrypted || tag(16)`; `associated_data` is
/// authenticated but not encrypted.
pub fn decrypt_resource(
    api_v3_key: &str,
    resource: &NotificationResource,
) -> std::result::Result<Vec<u8>, CryptoError> {
    let key = api_v3_key.as_bytes();
    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    if resource.nonce.len() != GCM_NONCE_LEN {
        return Err(CryptoError::BadFormat);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let data = BASE64
        .decode(resource.ciphertext.trim())
        .map_err(|e| CryptoError::Base64(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(resource.nonce.as_bytes()),
            Payload {
                msg: &data,
                aad: resource.associated_data.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::Aead)
}

/// [`decrypt_resource`] followed by JSON decoding.
pub fn decrypt_resource_json<T: DeserializeOwned>(
    api_v3_key: &str,
    resource: &NotificationResource,
) -> std::result::Result<T, CryptoError> {
    let plain = decrypt_resource(api_v3_key, resource)?;
    serde_json::from_slice(&plain).map_err(|e| CryptoError::Json(e.to_string()))
}

/// v2 digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignType {
    Md5,
    HmacSha256,
}

impl SignType {
    /// Value of the `sign_type` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignType::Md5 => "MD5",
            SignType::HmacSha256 => "HMAC-SHA256",
        }
    }
}

/// `k1=v1&k2=v2&...&key=API_KEY` over sorted, non-empty params except `sign`.
pub fn v2_string_to_sign(params: &BTreeMap<String, String>, api_key: &str) -> String {
    let mut s = params
        .iter()
        .filter(|(k, v)| !v.is_empty() && k.as_str() != "sign")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    if !s.is_empty() {
        s.push('&');
    }
    s.push_str("key=");
    s.push_str(api_key);
    s
}

pub fn sign_v2(params: &BTreeMap<String, String>, api_key: &str, sign_type: SignType) -> String {
    let s = v2_string_to_sign(params, api_key);
    let digest = match sign_type {
        SignType::Md5 => md5_hex(s.as_bytes()),
        SignType::HmacSha256 => hmac_sha256_hex(s.as_bytes(), api_key.as_bytes()),
    };
    digest.to_ascii_uppercase()
}

/// Check the `sign` field of a v2 response or notification.
pub fn verify_v2(params: &BTreeMap<String, String>, api_key: &str, sign_type: SignType) -> bool {
    params
        .get("sign")
        .map(|sign| sign.eq_ignore_ascii_case(&sign_v2(params, api_key, sign_type)))
        .unwrap_or(false)
}

/// Flat v2 XML body, every value wrapped in CDATA.
pub fn v2_to_xml(params: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<xml>");
    for (k, v) in params {
        xml.push_str(&format!("<{k}><![CDATA[{v}]]></{k}>"));
    }
    xml.push_str("</xml>");
    xml
}

/// Parse a flat v2 XML body into its fields.
pub fn v2_from_xml(xml: &str) -> std::result::Result<BTreeMap<String, String>, CryptoError> {
    quick_xml::de::from_str(xml).map_err(|_| CryptoError::BadFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsa_cipher::tests::{test_key, test_pems};

    const API_V3_KEY: &str = "0123456789abcdef0123456789ABCDEF";

    fn signer() -> PaySigner {
        let (private_key_pem, _) = test_pems();
        PaySigner::new(&PayConfig {
            mch_id: "1900009191".into(),
            serial_no: "408B07E79B8269FEC3D5D3E6AB8ED163A6A380DB".into(),
            private_key_pem,
            api_v3_key: API_V3_KEY.into(),
        })
        .unwrap()
    }

    #[test]
    fn message_layout() {
        assert_eq!(
            PaySigner::message("GET", "/v3/certificates", 1554208460, "593BEC0C930BF1AFEB40B4A08C8FB242", ""),
            "GET\n/v3/certificates\n1554208460\n593BEC0C930BF1AFEB40B4A08C8FB242\n\n"
        );
    }

    #[test]
    fn authorization_header_verifies() {
        let s = signer();
        let body = r#"{"appid":"wxd678efh567hg6787"}"#;
        let auth = s
            .authorization("post", "/v3/pay/transactions/jsapi", body, 1554208460, "NONCE1")
            .unwrap();
        assert!(auth.starts_with(r#"WECHATPAY2-SHA256-RSA2048 mchid="1900009191",nonce_str="NONCE1",signature=""#));
        assert!(auth.ends_with(
            r#"timestamp="1554208460",serial_no="408B07E79B8269FEC3D5D3E6AB8ED163A6A380DB""#
        ));

        let sig = auth
            .split("signature=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        let message = PaySigner::message("POST", "/v3/pay/transactions/jsapi", 1554208460, "NONCE1", body);
        rsa_cipher::verify_sha256(
            &test_key().to_public_key(),
            message.as_bytes(),
            &BASE64.decode(sig).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn sign_action_sets_headers() {
        let mut action = Action::post_json(
            "https://api.mch.weixin.qq.com/v3/pay/transactions/native",
            &serde_json::json!({"amount": {"total": 1}}),
        )
        .unwrap();
        signer().sign_action(&mut action).unwrap();
        let auth = action.headers[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with(AUTH_SCHEMA));
        assert_eq!(action.headers[ACCEPT], "application/json");
    }

    #[test]
    fn bridge_params_sign_package() {
        let p = signer().bridge_params("wx1", "up_wx21201855730335ac86f8c43d1889123400", 1414561699, "5K8264ILTKCH16CQ2502SI8ZNMTM67VS").unwrap();
        assert_eq!(p.package, "prepay_id=up_wx21201855730335ac86f8c43d1889123400");
        assert_eq!(p.sign_type, "RSA");
        let message = "wx1\n1414561699\n5K8264ILTKCH16CQ2502SI8ZNMTM67VS\nprepay_id=up_wx21201855730335ac86f8c43d1889123400\n";
        rsa_cipher::verify_sha256(
            &test_key().to_public_key(),
            message.as_bytes(),
            &BASE64.decode(&p.pay_sign).unwrap(),
        )
        .unwrap();
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("timeStamp").is_some());
    }

    #[test]
    fn platform_signature() {
        let key = test_key();
        let sig = BASE64.encode(rsa_cipher::sign_sha256(key, b"1554209980\nc5ac7061fccab6bf3e254dcf98995b8c\n{\"data\":1}\n").unwrap());
        let public = key.to_public_key();
        verify_platform_signature(&public, "1554209980", "c5ac7061fccab6bf3e254dcf98995b8c", "{\"data\":1}", &sig).unwrap();
        assert!(verify_platform_signature(&public, "1554209981", "c5ac7061fccab6bf3e254dcf98995b8c", "{\"data\":1}", &sig).is_err());
    }

    fn sealed_resource(plain: &str) -> NotificationResource {
        let cipher = Aes256Gcm::new_from_slice(API_V3_KEY.as_bytes()).unwrap();
        let nonce = "fdasflkja484";
        let data = cipher
            .encrypt(
                Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: plain.as_bytes(),
                    aad: b"transaction",
                },
            )
            .unwrap();
        NotificationResource {
            algorithm: "AEAD_AES_256_GCM".into(),
            ciphertext: BASE64.encode(data),
            associated_data: "transaction".into(),
            nonce: nonce.into(),
            original_type: "transaction".into(),
        }
    }

    #[test]
    fn decrypts_notification_resource() {
        let resource = sealed_resource(r#"{"out_trade_no":"1217752501201407033233368018","trade_state":"SUCCESS"}"#);
        let v: serde_json::Value = decrypt_resource_json(API_V3_KEY, &resource).unwrap();
        assert_eq!(v["trade_state"], "SUCCESS");
    }

    #[test]
    fn resource_with_wrong_aad_or_key_fails() {
        let mut resource = sealed_resource("{}");
        resource.associated_data = "refund".into();
        assert_eq!(decrypt_resource(API_V3_KEY, &resource), Err(CryptoError::Aead));

        let resource = sealed_resource("{}");
        assert_eq!(
            decrypt_resource("ffffffffffffffffffffffffffffffff", &resource),
            Err(CryptoError::Aead)
        );
        assert_eq!(
            decrypt_resource("short", &resource),
            Err(CryptoError::InvalidKeyLength(5))
        );
    }

    #[test]
    fn notification_body_parses() {
        let resource = sealed_resource("{}");
        let body = serde_json::json!({
            "id": "EV-2018022511223320873",
            "create_time": "2015-05-20T13:29:35+08:00",
            "event_type": "TRANSACTION.SUCCESS",
            "resource_type": "encrypt-resource",
            "resource": resource,
            "summary": "支付成功"
        });
        let n: Notification = serde_json::from_value(body).unwrap();
        assert_eq!(n.event_type, "TRANSACTION.SUCCESS");
        assert!(decrypt_resource(API_V3_KEY, &n.resource).is_ok());
    }

    fn v2_params() -> BTreeMap<String, String> {
        [
            ("appid", "wxd930ea5d5a258f4f"),
            ("mch_id", "10000100"),
            ("device_info", "1000"),
            ("body", "test"),
            ("nonce_str", "ibuaiVcKdpRxkhJA"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn v2_md5_reference_vector() {
        let params = v2_params();
        let key = "192006250b4c09247ec02edce69f6a2d";
        assert_eq!(
            v2_string_to_sign(&params, key),
            "appid=wxd930ea5d5a258f4f&body=test&device_info=1000&mch_id=10000100&nonce_str=ibuaiVcKdpRxkhJA&key=192006250b4c09247ec02edce69f6a2d"
        );
        assert_eq!(sign_v2(&params, key, SignType::Md5), "9A0A8659F005D6984697E2CA0A9CF3B7");
    }

    #[test]
    fn v2_skips_empty_and_sign() {
        let mut params = v2_params();
        let base = sign_v2(&params, "k", SignType::HmacSha256);
        params.insert("attach".into(), String::new());
        params.insert("sign".into(), "WHATEVER".into());
        assert_eq!(sign_v2(&params, "k", SignType::HmacSha256), base);
        assert_eq!(base, base.to_ascii_uppercase());
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn v2_xml_roundtrip_and_verify() {
        let mut params = v2_params();
        let sign = sign_v2(&params, "k", SignType::Md5);
        params.insert("sign".into(), sign);
        let xml = v2_to_xml(&params);
        assert!(xml.starts_with("<xml><appid><![CDATA[wxd930ea5d5a258f4f]]></appid>"));
        let parsed = v2_from_xml(&xml).unwrap();
        assert_eq!(parsed, params);
        assert!(verify_v2(&parsed, "k", SignType::Md5));
        assert!(!verify_v2(&parsed, "other", SignType::Md5));
        assert_eq!(SignType::HmacSha256.as_str(), "HMAC-SHA256");
    }
}
