//! Vendor response envelopes.
//!
//! Two success contracts exist:
//! - WeChat family: `{"errcode":0,"errmsg":"ok",...}`; a missing `errcode`
//!   counts as success (token and media endpoints omit it).
//! - AntChain / E-sign family: `{"code":0,"message":"..","data":{..}}`.
//!
//! A non-zero code becomes [`Error::Wx`] or [`Error::Api`] with the vendor's
//! message verbatim. Bodies that fail to decode become
//! [`Error::UnexpectedResponse`] with credentials redacted and the body
//! truncated.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::client::{Error, RawResponse, Result, body_snippet};

/// WeChat API error response
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WxError {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

impl WxError {
    pub fn is_ok(&self) -> bool {
        self.errcode == 0
    }
}

/// `code`/`message`/`data` envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    pub data: Option<T>,
}

/// Fields whose values never appear in error text.
const REDACTED_FIELDS: &[&str] = &["access_token", "session_key", "ticket", "refresh_token"];

/// Check the `errcode` of a WeChat-family body without decoding the rest.
pub fn check_wx(status: u16, body: &[u8], max_body: usize) -> Result<()> {
    let head: WxError = serde_json::from_slice(body)
        .map_err(|e| unexpected(status, e.to_string(), body, max_body))?;
    if head.is_ok() {
        Ok(())
    } else {
        warn!(errcode = head.errcode, errmsg = %head.errmsg, "weixin api error");
        Err(Error::Wx {
            code: head.errcode,
            message: head.errmsg,
        })
    }
}

/// Check `errcode`, then decode the whole body as `T`.
pub fn decode_wx<T: DeserializeOwned>(status: u16, body: &[u8], max_body: usize) -> Result<T> {
    check_wx(status, body, max_body)?;
    serde_json::from_slice(body).map_err(|e| unexpected(status, e.to_string(), body, max_body))
}

/// Check `code`, then return `data` decoded as `T`.
///
/// A missing `data` decodes from JSON `null`, so `T = ()` or `Option<_>`
/// works for endpoints that return none.
pub fn decode_api<T: DeserializeOwned>(status: u16, body: &[u8], max_body: usize) -> Result<T> {
    let env: ApiEnvelope<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| unexpected(status, e.to_string(), body, max_body))?;
    if env.code != 0 {
        warn!(code = env.code, message = %env.message, "vendor api error");
        return Err(Error::Api {
            code: env.code,
            message: env.message,
        });
    }
    let data = env.data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data).map_err(|e| unexpected(status, e.to_string(), body, max_body))
}

/// Binary endpoints answer errors with a JSON body instead of the file.
pub(crate) fn reject_json_error(raw: &RawResponse) -> Result<()> {
    let looks_json = raw
        .content_type()
        .map(|ct| ct.contains("json") || ct.starts_with("text/plain"))
        .unwrap_or(false)
        || raw.body.first() == Some(&b'{');
    if !looks_json {
        return Ok(());
    }
    match serde_json::from_slice::<WxError>(&raw.body) {
        Ok(head) if !head.is_ok() => Err(Error::Wx {
            code: head.errcode,
            message: head.errmsg,
        }),
        Ok(_) => Ok(()),
        Err(e) => {
            debug!(error = %e, "json-looking binary body did not decode; passing through");
            Ok(())
        }
    }
}

fn unexpected(status: u16, error: String, body: &[u8], max_body: usize) -> Error {
    Error::UnexpectedResponse {
        status,
        error,
        body: redacted_body(body, max_body),
    }
}

/// Mask credential fields of a JSON body, then truncate.
pub(crate) fn redacted_body(body: &[u8], max_body: usize) -> String {
    if let Ok(mut v) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(obj) = v.as_object_mut() {
            for field in REDACTED_FIELDS {
                if obj.contains_key(*field) {
                    obj.insert(
                        (*field).to_string(),
                        serde_json::Value::String("[redacted]".into()),
                    );
                }
            }
        }
        if let Ok(s) = serde_json::to_vec(&v) {
            return body_snippet(&s, max_body);
        }
    }
    body_snippet(body, max_body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

    #[derive(Debug, Deserialize)]
    struct Token {
        access_token: String,
        expires_in: u32,
    }

    #[test]
    fn nonzero_errcode_surfaces_code_and_message() {
        let body = br#"{"errcode":40001,"errmsg":"invalid credential"}"#;
        let err = decode_wx::<serde_json::Value>(200, body, 2048).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("40001"), "{text}");
        assert!(text.contains("invalid credential"), "{text}");
        assert!(matches!(err, Error::Wx { code: 40001, .. }));
    }

    #[test]
    fn zero_errcode_is_success() {
        let body = br#"{"errcode":0,"errmsg":"ok","msgid":123}"#;
        let v: serde_json::Value = decode_wx(200, body, 2048).unwrap();
        assert_eq!(v["msgid"], 123);
        assert!(check_wx(200, body, 2048).is_ok());
    }

    #[test]
    fn missing_errcode_is_success() {
        let body = br#"{"access_token":"T","expires_in":7200}"#;
        let t: Token = decode_wx(200, body, 2048).unwrap();
        assert_eq!(t.access_token, "T");
        assert_eq!(t.expires_in, 7200);
    }

    #[test]
    fn decode_failure_redacts_token() {
        let body = br#"{"access_token":"SECRET_TOKEN","expires_in":"soon"}"#;
        let err = decode_wx::<Token>(200, body, 2048).unwrap_err();
        let Error::UnexpectedResponse { status, body, .. } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*status, 200);
        assert!(!body.contains("SECRET_TOKEN"));
        assert!(body.contains("[redacted]"));
    }

    #[test]
    fn non_json_body_is_unexpected_and_truncated() {
        let body = vec![b'x'; 5000];
        let err = decode_wx::<serde_json::Value>(200, &body, 2048).unwrap_err();
        let Error::UnexpectedResponse { body, .. } = err else {
            panic!("expected UnexpectedResponse");
        };
        assert_eq!(body.len(), 2048 + 3);
    }

    #[test]
    fn api_envelope_returns_data() {
        let body = br#"{"code":0,"message":"success","data":{"fileId":"f1"}}"#;
        let v: serde_json::Value = decode_api(200, body, 2048).unwrap();
        assert_eq!(v["fileId"], "f1");
    }

    #[test]
    fn api_envelope_nonzero_code() {
        let body = r#"{"code":1435002,"message":"参数错误","data":null}"#.as_bytes();
        let err = decode_api::<serde_json::Value>(200, body, 2048).unwrap_err();
        assert!(matches!(err, Error::Api { code: 1435002, ref message } if message == "参数错误"));
        assert!(err.to_string().contains("1435002"));
    }

    #[test]
    fn api_envelope_without_data() {
        let body = br#"{"code":0,"msg":"ok"}"#;
        decode_api::<()>(200, body, 2048).unwrap();
    }

    #[test]
    fn binary_download_with_json_error() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let raw = RawResponse {
            status: 200,
            headers,
            body: Bytes::from_static(br#"{"errcode":40007,"errmsg":"invalid media_id"}"#),
        };
        assert!(matches!(
            reject_json_error(&raw),
            Err(Error::Wx { code: 40007, .. })
        ));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
        let raw = RawResponse {
            status: 200,
            headers,
            body: Bytes::from_static(b"\xff\xd8\xff"),
        };
        assert!(reject_json_error(&raw).is_ok());
    }
}
