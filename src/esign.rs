//! E-sign request signing.
//!
//! Every call carries an HMAC-SHA256 (base64) signature over a canonical
//! string built in this fixed order, one field per line:
//!
//! ```text
//! METHOD
//! Accept
//! Content-MD5
//! Content-Type
//! Date
//! [key:value per custom header, sorted by key]
//! path[?k1=v1&k2=v2, sorted by key]
//! ```
//!
//! Omitted fields stay as empty lines. The remote verifier rebuilds the same
//! string, so separators and order must not change.

use std::collections::BTreeMap;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::client::{Action, Error, Result};
use crate::sign::{content_md5, hmac_sha256_base64};

pub const DEFAULT_ACCEPT: &str = "*/*";

pub const HEADER_APP_ID: &str = "x-tsign-open-app-id";
pub const HEADER_AUTH_MODE: &str = "x-tsign-open-auth-mode";
pub const HEADER_SIGNATURE: &str = "x-tsign-open-ca-signature";
pub const HEADER_TIMESTAMP: &str = "x-tsign-open-ca-timestamp";
pub const HEADER_CONTENT_MD5: &str = "content-md5";

/// Request metadata that goes into the string-to-sign.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    method: String,
    accept: String,
    content_md5: String,
    content_type: String,
    date: String,
    headers: BTreeMap<String, String>,
    path: String,
    query: BTreeMap<String, String>,
}

impl CanonicalRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            accept: DEFAULT_ACCEPT.to_string(),
            content_md5: String::new(),
            content_type: String::new(),
            date: String::new(),
            headers: BTreeMap::new(),
            path: path.to_string(),
            query: BTreeMap::new(),
        }
    }

    /// Split `path?query` and collect the query pairs.
    pub fn from_path_and_query(method: &str, path_and_query: &str) -> Self {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        let mut req = Self::new(method, path);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            req.query.insert(k.to_string(), v.to_string());
        }
        req
    }

    pub fn accept(mut self, accept: &str) -> Self {
        self.accept = accept.to_string();
        self
    }

    pub fn content_md5(mut self, md5: &str) -> Self {
        self.content_md5 = md5.to_string();
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn string_to_sign(&self) -> String {
        let mut s = format!(
            "{}\n{}\n{}\n{}\n{}\n",
            self.method, self.accept, self.content_md5, self.content_type, self.date
        );
        for (k, v) in &self.headers {
            s.push_str(k);
            s.push(':');
            s.push_str(v);
            s.push('\n');
        }
        s.push_str(&self.path);
        if !self.query.is_empty() {
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{k}={v}")
                    }
                })
                .collect();
            s.push('?');
            s.push_str(&pairs.join("&"));
        }
        s
    }

    pub fn sign(&self, app_secret: &str) -> String {
        hmac_sha256_base64(self.string_to_sign().as_bytes(), app_secret.as_bytes())
    }
}

/// Credentials for the E-sign open platform.
#[derive(Clone, Deserialize)]
pub struct EsignConfig {
    pub app_id: String,
    pub app_secret: String,
}

impl std::fmt::Debug for EsignConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsignConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[redacted]")
            .finish()
    }
}

/// Produces the signed header set for E-sign calls.
#[derive(Debug, Clone)]
pub struct EsignSigner {
    config: EsignConfig,
}

impl EsignSigner {
    pub fn new(config: EsignConfig) -> Self {
        Self { config }
    }

    /// Headers for a request at `timestamp_ms`.
    ///
    /// `path_and_query` is the request target without scheme and host.
    pub fn signed_headers(
        &self,
        method: &str,
        path_and_query: &str,
        body: &[u8],
        content_type: &str,
        timestamp_ms: u64,
    ) -> Result<HeaderMap> {
        let md5 = if body.is_empty() {
            String::new()
        } else {
            content_md5(body)
        };
        let canonical = CanonicalRequest::from_path_and_query(method, path_and_query)
            .content_md5(&md5)
            .content_type(content_type);
        let signature = canonical.sign(&self.config.app_secret);
        debug!(method, path_and_query, "esign request signed");

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        insert(&mut headers, CONTENT_TYPE.as_str(), content_type)?;
        insert(&mut headers, HEADER_CONTENT_MD5, &md5)?;
        insert(&mut headers, HEADER_APP_ID, &self.config.app_id)?;
        insert(&mut headers, HEADER_AUTH_MODE, "Signature")?;
        insert(&mut headers, HEADER_SIGNATURE, &signature)?;
        insert(&mut headers, HEADER_TIMESTAMP, &timestamp_ms.to_string())?;
        Ok(headers)
    }

    /// Sign an [`Action`] in place using the current clock.
    pub fn sign_action(&self, action: &mut Action) -> Result<()> {
        let target = action.path_and_query()?;
        let body = action.body.bytes();
        let headers = self.signed_headers(
            action.method.as_str(),
            &target,
            &body,
            action.body.content_type().unwrap_or("application/json; charset=UTF-8"),
            crate::client::unix_millis(),
        )?;
        action.headers.extend(headers);
        Ok(())
    }
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidHeader(e.to_string()))?;
    let value = HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader(e.to_string()))?;
    headers.insert(name, value);
    Ok(())
}
