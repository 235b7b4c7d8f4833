//! Access-token fetch.
//!
//! Endpoints:
//! - Official Account / Mini Program: GET https://api.weixin.qq.com/cgi-bin/token?grant_type=client_credential&appid=APPID&secret=APPSECRET
//! - WeCom: GET https://qyapi.weixin.qq.com/cgi-bin/gettoken?corpid=CORP_ID&corpsecret=CORP_SECRET
//!
//! Caching and refresh belong to the application layer; a token lives
//! `expires_in` seconds (7200 at the time of writing) and fetching a new one
//! may invalidate the previous one.
//!
//! ```ignore
//! use wxkit_rs::{Auth, Client};
//!
//! let client = Client::default();
//! let token = client
//!     .get_access_token(&Auth::OfficialAccount {
//!         appid: "your_appid".into(),
//!         secret: "your_appsecret".into(),
//!     })
//!     .await?;
//! println!("expires_in: {}", token.expires_in);
//! ```

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::client::{Action, Client, Error, Result, id_hint};

pub const OFFICIAL_TOKEN_URL: &str = "https://api.weixin.qq.com/cgi-bin/token";
pub const WECOM_TOKEN_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin/gettoken";

/// Authentication method
///
/// - OfficialAccount: Official Account / Mini Program uses appid + appsecret
/// - WeCom: WeCom uses corp_id + corp_secret
#[derive(Clone)]
pub enum Auth {
    OfficialAccount { appid: String, secret: String },
    WeCom {
        corp_id: String,
        corp_secret: String,
    },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::OfficialAccount { appid, .. } => f
                .debug_struct("OfficialAccount")
                .field("appid", appid)
                .finish_non_exhaustive(),
            Auth::WeCom { corp_id, .. } => f
                .debug_struct("WeCom")
                .field("corp_id", corp_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Successful access_token response
#[derive(Clone, Debug, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Expiration in seconds
    pub expires_in: u32,
}

impl Auth {
    /// The token request, secrets included; never log it unredacted.
    pub fn token_action(&self) -> Action {
        match self {
            Auth::OfficialAccount { appid, secret } => Action::get(OFFICIAL_TOKEN_URL)
                .query("grant_type", "client_credential")
                .query("appid", appid)
                .query("secret", secret),
            Auth::WeCom {
                corp_id,
                corp_secret,
            } => Action::get(WECOM_TOKEN_URL)
                .query("corpid", corp_id)
                .query("corpsecret", corp_secret),
        }
    }

    fn is_wecom(&self) -> bool {
        matches!(self, Auth::WeCom { .. })
    }

    /// Warn about ids that belong to the other product line.
    fn check_shape(&self) {
        match self {
            Auth::OfficialAccount { appid, .. } if appid.starts_with("ww") => warn!(
                "appid starts with 'ww' (looks like a WeCom corpid); use Auth::WeCom for WeCom apis"
            ),
            Auth::WeCom { corp_id, .. } if corp_id.starts_with("wx") => warn!(
                "corpid starts with 'wx' (looks like an OA/MP appid); WeCom corp ids start with 'ww'"
            ),
            _ => {}
        }
    }

    fn id(&self) -> &str {
        match self {
            Auth::OfficialAccount { appid, .. } => appid,
            Auth::WeCom { corp_id, .. } => corp_id,
        }
    }
}

impl Client {
    /// Fetch access_token (no caching, one attempt).
    #[instrument(level = "debug", skip(self, auth))]
    pub async fn get_access_token(&self, auth: &Auth) -> Result<AccessToken> {
        auth.check_shape();
        debug!(id = %id_hint(auth.id()), wecom = auth.is_wecom(), "requesting access_token");
        self.call_wx::<AccessToken>(&auth.token_action())
            .await
            .map_err(|e| with_hint(auth, e))
    }
}

/// Append a credential hint to WeCom token errors, where appid/corpid mixups
/// are the usual cause.
fn with_hint(auth: &Auth, err: Error) -> Error {
    match err {
        Error::Wx { code, mut message } if auth.is_wecom() => {
            let hint = match code {
                40013 => "; hint: invalid corpid, ensure it starts with 'ww'",
                40001 | 42001 => {
                    "; hint: corpsecret must be the application secret from the WeCom admin console"
                }
                40014 | 40125 => "; hint: secret does not match corpid; do not use an OA/MP appsecret",
                _ => "; hint: verify corpid and corpsecret belong together",
            };
            message.push_str(hint);
            Error::Wx { code, message }
        }
        other => other,
    }
}
