//! Callback server: URL verification, decryption and encrypted passive replies.
//!
//! ```bash
//! WXKIT_CALLBACK_TOKEN=your_token \
//! WXKIT_CALLBACK_ENCODING_AES_KEY=your_43_char_key \
//! WXKIT_CALLBACK_RECEIVER_ID=your_corpid_or_appid \
//! cargo run --example callback_server
//! ```
//!
//! Listens on http://127.0.0.1:3000
//! - GET  /callback - URL verification (encrypted echostr, or plaintext mode)
//! - POST /callback - message delivery; text messages are echoed back encrypted

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wxkit_rs::callback::{
    CallbackConfig, CallbackCrypto, CallbackMessage, parse_xml, verify_plain_echostr,
};
use wxkit_rs::keygen::generate_nonce;

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    msg_signature: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    timestamp: String,
    nonce: String,
    #[serde(default)]
    echostr: Option<String>,
}

#[derive(Clone)]
struct AppState {
    crypto: Arc<CallbackCrypto>,
    token: Arc<String>,
}

async fn verify_url(
    State(state): State<AppState>,
    Query(q): Query<CallbackQuery>,
) -> Result<String, StatusCode> {
    let echostr = q.echostr.as_deref().ok_or(StatusCode::BAD_REQUEST)?;
    let result = match (&q.msg_signature, &q.signature) {
        (Some(msg_signature), _) => {
            state
                .crypto
                .verify_echostr(&q.timestamp, &q.nonce, msg_signature, echostr)
        }
        (None, Some(signature)) => {
            verify_plain_echostr(&state.token, &q.timestamp, &q.nonce, signature, echostr)
        }
        (None, None) => return Err(StatusCode::BAD_REQUEST),
    };
    result.map_err(|e| {
        warn!("url verification failed: {e}");
        StatusCode::FORBIDDEN
    })
}

async fn receive(
    State(state): State<AppState>,
    Query(q): Query<CallbackQuery>,
    body: String,
) -> Result<String, StatusCode> {
    let msg_signature = q.msg_signature.as_deref().ok_or(StatusCode::BAD_REQUEST)?;
    let xml = state
        .crypto
        .decrypt_body(&q.timestamp, &q.nonce, msg_signature, &body)
        .map_err(|e| {
            warn!("callback rejected: {e}");
            StatusCode::FORBIDDEN
        })?;

    let msg: CallbackMessage = parse_xml(&xml).map_err(|e| {
        error!("unparseable message: {e}");
        StatusCode::BAD_REQUEST
    })?;
    info!(msg_type = %msg.msg_type, event = ?msg.event, "callback received");

    let Some(content) = msg.content.filter(|_| msg.msg_type == "text") else {
        return Ok("success".to_string());
    };

    let reply = format!(
        "<xml><ToUserName><![CDATA[{}]]></ToUserName>\
         <FromUserName><![CDATA[{}]]></FromUserName>\
         <CreateTime>{}</CreateTime>\
         <MsgType><![CDATA[text]]></MsgType>\
         <Content><![CDATA[echo: {}]]></Content></xml>",
        msg.from_user_name, msg.to_user_name, msg.create_time, content
    );
    let encrypted = state
        .crypto
        .encrypt_reply(&reply, &q.timestamp, &generate_nonce())
        .map_err(|e| {
            error!("reply encryption failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(encrypted.to_xml())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = CallbackConfig::from_env("WXKIT_CALLBACK")?;
    let token = Arc::new(config.token.clone());
    let state = AppState {
        crypto: Arc::new(CallbackCrypto::new(config)?),
        token,
    };

    let app = Router::new()
        .route("/callback", get(verify_url).post(receive))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!("listening on http://127.0.0.1:3000");
    axum::serve(listener, app).await?;
    Ok(())
}
