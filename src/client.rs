//! HTTP plumbing shared by every vendor API.
//!
//! Design:
//! - An endpoint call is described by an [`Action`]: method, url, query pairs,
//!   headers and a pre-encoded [`Body`]. Signers (E-sign, WeChat Pay) mutate the
//!   action before it is sent, so the signed bytes are exactly the sent bytes.
//! - [`Client`] wraps a pooled `reqwest::Client` plus an immutable
//!   [`ClientConfig`]; it is cheap to clone and safe to share.
//! - One attempt per call. Retry, backoff and token caching belong to the caller;
//!   [`Error::is_retryable`] and [`Error::should_refresh_token`] help decide.
//!
//! ```ignore
//! use wxkit_rs::{Action, Client};
//!
//! let client = Client::default();
//! let action = Action::post_json("https://api.weixin.qq.com/cgi-bin/menu/create", &menu)?
//!     .access_token(&token);
//! let _: serde_json::Value = client.call_wx(&action).await?;
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cipher::CryptoError;
use crate::errcode;
use crate::response;
use crate::rsa_cipher::RsaError;

/// Unified error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("unexpected http status {status}: {body}")]
    Status { status: u16, body: String },

    /// WeChat family: non-zero `errcode`.
    #[error("weixin error {code}: {message}")]
    Wx { code: i64, message: String },

    /// AntChain / E-sign family: non-zero `code`.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("unexpected response (status {status}): {error}; body: {body}")]
    UnexpectedResponse {
        status: u16,
        error: String,
        body: String,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Rsa(#[from] RsaError),
}

impl Error {
    /// Vendor business code, if this is a vendor error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::Wx { code, .. } | Error::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a caller-side retry makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Status { status, .. } => *status >= 500 || *status == 429,
            Error::Wx { code, .. } => errcode::should_retry(*code).retry,
            _ => false,
        }
    }

    /// Whether the access_token should be fetched again before retrying.
    pub fn should_refresh_token(&self) -> bool {
        match self {
            Error::Wx { code, .. } => errcode::should_refresh_token(*code),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transport settings, fixed at construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub gzip: bool,
    /// Error bodies are truncated to this many bytes.
    pub max_error_body: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            connect_timeout_secs: 5,
            user_agent: concat!("wxkit-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            gzip: true,
            max_error_body: 2048,
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }
}

/// Pre-encoded request body.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Bytes),
    Xml(String),
    Raw { content_type: String, data: Bytes },
}

impl Body {
    pub fn bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Json(b) => b.clone(),
            Body::Xml(s) => Bytes::from(s.clone()),
            Body::Raw { data, .. } => data.clone(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Body::Empty => None,
            Body::Json(_) => Some("application/json; charset=UTF-8"),
            Body::Xml(_) => Some("text/xml; charset=utf-8"),
            Body::Raw { content_type, .. } => Some(content_type.as_str()),
        }
    }
}

/// One vendor endpoint call.
#[derive(Debug, Clone)]
pub struct Action {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Body,
}

const SENSITIVE_QUERY_KEYS: &[&str] = &[
    "access_token",
    "secret",
    "corpsecret",
    "appsecret",
    "js_code",
    "suite_access_token",
];

impl Action {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post_json<B: Serialize + ?Sized>(url: &str, body: &B) -> Result<Self> {
        let encoded = serde_json::to_vec(body).map_err(|e| Error::Encode(e.to_string()))?;
        Ok(Self::new(Method::POST, url).with_body(Body::Json(Bytes::from(encoded))))
    }

    pub fn post_xml(url: &str, xml: impl Into<String>) -> Self {
        Self::new(Method::POST, url).with_body(Body::Xml(xml.into()))
    }

    /// multipart/form-data upload with a single file part.
    pub fn upload(
        url: &str,
        field: &str,
        filename: &str,
        content_type: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Self {
        let boundary = make_boundary();
        let mime = content_type.unwrap_or_else(|| guess_mime_from_filename(filename));
        let data = multipart_body(&boundary, field, filename, mime, &data.into());
        Self::new(Method::POST, url).with_body(Body::Raw {
            content_type: format!("multipart/form-data; boundary={boundary}"),
            data,
        })
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn access_token(self, token: &str) -> Self {
        self.query("access_token", token)
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader(e.to_string()))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Full url with query pairs appended.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if !self.query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in &self.query {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Request target without scheme and host, as signers see it.
    pub fn path_and_query(&self) -> Result<String> {
        let url = self.url()?;
        Ok(match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        })
    }

    /// Url safe for logs: credential query values are masked.
    pub fn redacted_url(&self) -> String {
        let Ok(mut url) = self.url() else {
            return self.url.clone();
        };
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let v = if SENSITIVE_QUERY_KEYS.contains(&k.as_ref()) {
                    "***".to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), v)
            })
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        url.to_string()
    }
}

/// Raw response for callers that need status and headers (media downloads).
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// Base client for every vendor API
///
/// - Wraps `reqwest::Client` (connection pool, TLS)
/// - Carries only immutable configuration
/// - No token caching or retries
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default()).expect("reqwest::Client build must succeed")
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(config.gzip)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    /// Use a custom `reqwest::Client`; timeouts are whatever it was built with.
    pub fn with_http(http: reqwest::Client) -> Self {
        Self {
            http,
            config: ClientConfig::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send without judging the status code.
    #[instrument(level = "debug", skip(self, action), fields(method = %action.method, url = %action.redacted_url()))]
    pub async fn execute_raw(&self, action: &Action) -> Result<RawResponse> {
        let url = action.url()?;
        let mut headers = action.headers.clone();
        if !headers.contains_key(CONTENT_TYPE) {
            if let Some(ct) = action.body.content_type() {
                let value =
                    HeaderValue::from_str(ct).map_err(|e| Error::InvalidHeader(e.to_string()))?;
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let mut req = self.http.request(action.method.clone(), url).headers(headers);
        let body = action.body.bytes();
        if !body.is_empty() {
            req = req.body(body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        debug!(status, len = body.len(), "response received");
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    /// Send and require a 2xx status; returns the body.
    pub async fn execute(&self, action: &Action) -> Result<Bytes> {
        let raw = self.execute_raw(action).await?;
        self.require_success(raw)
    }

    /// Send and decode a WeChat-family (`errcode`/`errmsg`) response.
    pub async fn call_wx<T: DeserializeOwned>(&self, action: &Action) -> Result<T> {
        let raw = self.execute_raw(action).await?;
        let status = raw.status;
        let body = self.require_success(raw)?;
        response::decode_wx(status, &body, self.config.max_error_body)
    }

    /// Send and decode a `code`/`message`/`data` response, returning `data`.
    pub async fn call_api<T: DeserializeOwned>(&self, action: &Action) -> Result<T> {
        let raw = self.execute_raw(action).await?;
        let status = raw.status;
        let body = self.require_success(raw)?;
        response::decode_api(status, &body, self.config.max_error_body)
    }

    /// Binary download; a JSON body on a binary endpoint is a vendor error.
    pub async fn download(&self, action: &Action) -> Result<RawResponse> {
        let raw = self.execute_raw(action).await?;
        if !(200..300).contains(&raw.status) {
            return Err(self.status_error(&raw));
        }
        response::reject_json_error(&raw)?;
        Ok(raw)
    }

    pub async fn get(&self, url: &str) -> Result<Bytes> {
        self.execute(&Action::get(url)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Bytes> {
        self.execute(&Action::post_json(url, body)?).await
    }

    pub async fn post_xml(&self, url: &str, xml: impl Into<String>) -> Result<Bytes> {
        self.execute(&Action::post_xml(url, xml)).await
    }

    pub async fn upload(
        &self,
        url: &str,
        field: &str,
        filename: &str,
        content_type: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Result<Bytes> {
        self.execute(&Action::upload(url, field, filename, content_type, data))
            .await
    }

    fn require_success(&self, raw: RawResponse) -> Result<Bytes> {
        if (200..300).contains(&raw.status) {
            Ok(raw.body)
        } else {
            Err(self.status_error(&raw))
        }
    }

    fn status_error(&self, raw: &RawResponse) -> Error {
        warn!(status = raw.status, "non-success http status");
        Error::Status {
            status: raw.status,
            body: body_snippet(&raw.body, self.config.max_error_body),
        }
    }
}

/* -------------------- helpers -------------------- */

pub(crate) fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lossy text of a body, cut at `max` bytes on a char boundary.
pub(crate) fn body_snippet(bytes: &[u8], max: usize) -> String {
    let mut body = String::from_utf8_lossy(bytes).into_owned();
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}

/// Short identifier hint for logs, e.g. `wx***c7`.
pub(crate) fn id_hint(id: &str) -> String {
    if id.len() <= 4 || !id.is_ascii() {
        format!("{}***", id.chars().take(2).collect::<String>())
    } else {
        format!("{}***{}", &id[..2], &id[id.len() - 2..])
    }
}

fn make_boundary() -> String {
    let tag: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("----wxkit-rs-{tag}")
}

/// --boundary\r\n
/// Content-Disposition: form-data; name="FIELD"; filename="..."; filelength=LEN\r\n
/// Content-Type: MIME\r\n
/// \r\n
/// <bytes>\r\n
/// --boundary--\r\n
///
/// `filelength` is a WeChat extension; other vendors ignore it.
fn multipart_body(boundary: &str, field: &str, filename: &str, mime: &str, data: &Bytes) -> Bytes {
    let head = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{}\"; filelength={}\r\n\
         Content-Type: {mime}\r\n\r\n",
        filename.replace('"', "_"),
        data.len()
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    let mut buf = Vec::with_capacity(head.len() + data.len() + tail.len());
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(tail.as_bytes());
    Bytes::from(buf)
}

fn guess_mime_from_filename(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "amr" => "audio/amr",
        "mp3" => "audio/mpeg",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
