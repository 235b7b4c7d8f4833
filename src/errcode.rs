//! WeChat-family global `errcode` helpers.
//!
//! - Map well-known codes to a category, a short summary and a hint
//! - Recommend whether to retry (and how), or refresh the access_token
//! - Detect the "wrong json format" warning some endpoints put in `errmsg`
//!
//! Program logic should depend on `errcode`; `errmsg` is diagnostic text and
//! changes without notice. Unknown codes get a conservative policy: no retry,
//! no token refresh.

/// High-level classification for an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Success,
    /// System busy or another transient condition
    TemporarySystem,
    /// Credential, token or permission problem
    Auth,
    InvalidParam,
    NotFound,
    /// Quota or frequency limit
    Limit,
    /// Feature not enabled, or api not authorized for this account
    Unsupported,
    /// Timing or state rule (code already used, window closed)
    InvalidState,
    Unknown,
}

/// Recommendation for retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    pub retry: bool,
    /// First backoff in milliseconds
    pub initial_backoff_ms: Option<u64>,
    pub max_retries: Option<u8>,
    pub reason: &'static str,
}

impl RetryAdvice {
    pub const NO: RetryAdvice = RetryAdvice {
        retry: false,
        initial_backoff_ms: None,
        max_retries: None,
        reason: "do not retry",
    };
    pub const TRANSIENT: RetryAdvice = RetryAdvice {
        retry: true,
        initial_backoff_ms: Some(300),
        max_retries: Some(3),
        reason: "system busy; retry with backoff",
    };
    pub const AFTER_REFRESH: RetryAdvice = RetryAdvice {
        retry: false,
        initial_backoff_ms: None,
        max_retries: None,
        reason: "credential or token problem; fix or refresh before retry",
    };
    pub const RATE_LIMITED: RetryAdvice = RetryAdvice {
        retry: true,
        initial_backoff_ms: Some(60_000),
        max_retries: Some(1),
        reason: "frequency limit; retry after the window resets",
    };
}

/// Structured explanation for an errcode.
#[derive(Debug, Clone)]
pub struct ErrorHelp {
    pub code: i64,
    pub category: ErrorCategory,
    pub summary: &'static str,
    pub hint: &'static str,
    pub retry: RetryAdvice,
    pub refresh_token: bool,
}

use ErrorCategory::*;

// (code, category, summary, hint)
const KNOWN: &[(i64, ErrorCategory, &str, &str)] = &[
    (-1, TemporarySystem, "System busy", "Retry with backoff (at most 3 attempts)."),
    (0, Success, "Success", "Success."),
    (40001, Auth, "Invalid credential", "AppSecret is wrong or the access_token is stale; refresh the token."),
    (40002, InvalidParam, "Invalid grant_type", "Use grant_type=client_credential."),
    (40003, InvalidParam, "Invalid openid", "The openid does not belong to this appid."),
    (40013, Auth, "Invalid appid", "Check the appid/corpid; WeCom corp ids start with 'ww'."),
    (40014, Auth, "Invalid access_token", "Fetch a new access_token with the matching credential pair."),
    (40029, InvalidParam, "Invalid code", "The login code is wrong or expired; obtain a new one."),
    (40125, Auth, "Invalid appsecret", "The secret does not match the appid/corpid."),
    (40163, InvalidState, "Code been used", "Each login code is single use."),
    (40164, Auth, "Caller IP not whitelisted", "Add the server IP to the API IP whitelist."),
    (41001, Auth, "Missing access_token", "Pass access_token as a query parameter."),
    (41002, InvalidParam, "Missing appid", "Pass the appid parameter."),
    (42001, Auth, "access_token expired", "Refresh the token; it lives 7200 seconds."),
    (43004, InvalidState, "Receiver not subscribed", "The user must follow the account first."),
    (44002, InvalidParam, "Empty POST body", "Send a JSON body."),
    (45009, Limit, "Daily api quota reached", "Wait for the daily reset or clear the quota in the console."),
    (45011, Limit, "Api minute-quota reached", "Slow down; retry after a minute."),
    (46003, NotFound, "Menu not found", "Create the menu before querying it."),
    (47001, InvalidParam, "Malformed request data", "Validate the JSON or XML request body."),
    (48001, Unsupported, "Api unauthorized", "The account has no permission for this api."),
    (50001, Unsupported, "User unauthorized for api", "The user has not granted this scope."),
    (61024, InvalidState, "Third-party authorization required", "Call through the authorizer access_token."),
    (85064, NotFound, "Template not found", "Check the template id."),
];

fn find(code: i64) -> Option<&'static (i64, ErrorCategory, &'static str, &'static str)> {
    KNOWN.iter().find(|entry| entry.0 == code)
}

/// Classify errcode into a category.
pub fn category_for(code: i64) -> ErrorCategory {
    find(code).map(|e| e.1).unwrap_or(Unknown)
}

/// Returns a friendly hint for a known errcode.
pub fn hint_for(code: i64) -> &'static str {
    find(code)
        .map(|e| e.3)
        .unwrap_or("Unknown code; refer to official docs and logs for details.")
}

/// Whether to retry, and how.
pub fn should_retry(code: i64) -> RetryAdvice {
    match code {
        -1 => RetryAdvice::TRANSIENT,
        45011 => RetryAdvice::RATE_LIMITED,
        _ if category_for(code) == Auth => RetryAdvice::AFTER_REFRESH,
        _ => RetryAdvice::NO,
    }
}

/// Whether to refresh/reacquire access_token for this code.
pub fn should_refresh_token(code: i64) -> bool {
    matches!(code, 40001 | 40014 | 42001)
}

/// Build a structured help object for a given errcode.
pub fn lookup(code: i64) -> ErrorHelp {
    ErrorHelp {
        code,
        category: category_for(code),
        summary: find(code).map(|e| e.2).unwrap_or("Unknown error"),
        hint: hint_for(code),
        retry: should_retry(code),
        refresh_token: should_refresh_token(code),
    }
}

/// One-line human-readable guidance.
pub fn explain(errcode: i64, errmsg: &str) -> String {
    let help = lookup(errcode);
    let mut parts = vec![
        format!("errcode={} ({:?})", help.code, help.category),
        help.summary.to_string(),
        format!("hint: {}", help.hint),
    ];

    if help.retry.retry {
        let mut retry_line = String::from("retry: yes");
        if let Some(ms) = help.retry.initial_backoff_ms {
            retry_line.push_str(&format!(", initial_backoff_ms={ms}"));
        }
        if let Some(n) = help.retry.max_retries {
            retry_line.push_str(&format!(", max_retries={n}"));
        }
        retry_line.push_str(&format!(" ({})", help.retry.reason));
        parts.push(retry_line);
    } else {
        parts.push(format!("retry: no ({})", help.retry.reason));
    }

    parts.push(format!(
        "refresh_token: {}",
        if help.refresh_token { "yes" } else { "no" }
    ));

    if contains_wrong_json_format(errmsg) {
        parts.push("detected: wrong json format; validate the request body".to_string());
    }

    parts.join(" | ")
}

/// Detect "Warning: wrong json format." in errmsg (case-insensitive).
pub fn contains_wrong_json_format(errmsg: &str) -> bool {
    errmsg
        .to_ascii_lowercase()
        .contains("warning: wrong json format")
}
