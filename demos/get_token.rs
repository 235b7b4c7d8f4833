//! Fetch an access_token for an Official Account / Mini Program and/or WeCom.
//!
//! ```bash
//! WX_APPID=... WX_APPSECRET=... cargo run --example get_token
//! WECOM_CORP_ID=... WECOM_CORP_SECRET=... cargo run --example get_token
//! ```
//!
//! The token is printed masked; caching it is the caller's job.

use std::env;

use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;
use wxkit_rs::{Auth, Client, errcode};

fn mask(token: &str) -> String {
    let head: String = token.chars().take(6).collect();
    format!("{head}...({} chars)", token.len())
}

async fn fetch(client: &Client, label: &str, auth: Auth) {
    match client.get_access_token(&auth).await {
        Ok(token) => println!(
            "[OK] {label}: access_token={} expires_in={}s",
            mask(&token.access_token),
            token.expires_in
        ),
        Err(e) => {
            eprintln!("[ERR] {label}: {e}");
            if let Some(code) = e.code() {
                eprintln!("      {}", errcode::explain(code, &e.to_string()));
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let client = Client::default();
    let mut attempted = false;

    if let (Ok(appid), Ok(secret)) = (env::var("WX_APPID"), env::var("WX_APPSECRET")) {
        attempted = true;
        fetch(&client, "official account", Auth::OfficialAccount { appid, secret }).await;
    }

    if let (Ok(corp_id), Ok(corp_secret)) =
        (env::var("WECOM_CORP_ID"), env::var("WECOM_CORP_SECRET"))
    {
        attempted = true;
        fetch(
            &client,
            "wecom",
            Auth::WeCom {
                corp_id,
                corp_secret,
            },
        )
        .await;
    }

    if !attempted {
        println!("Set WX_APPID/WX_APPSECRET or WECOM_CORP_ID/WECOM_CORP_SECRET.");
    }
    Ok(())
}
