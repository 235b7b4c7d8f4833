//! Print the signed header set for an E-sign request, then send it.
//!
//! ```bash
//! ESIGN_APP_ID=... ESIGN_APP_SECRET=... cargo run --example esign_headers
//! ```
//!
//! `ESIGN_HOST` defaults to the sandbox gateway.

use std::env;

use anyhow::Context;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;
use wxkit_rs::esign::CanonicalRequest;
use wxkit_rs::{Action, Client, EsignConfig, EsignSigner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = EsignConfig {
        app_id: env::var("ESIGN_APP_ID").context("ESIGN_APP_ID is not set")?,
        app_secret: env::var("ESIGN_APP_SECRET").context("ESIGN_APP_SECRET is not set")?,
    };
    let host = env::var("ESIGN_HOST").unwrap_or_else(|_| "https://smlopenapi.esign.cn".into());
    let signer = EsignSigner::new(config);

    let mut action = Action::post_json(
        &format!("{host}/v3/files/file-upload-url"),
        &serde_json::json!({
            "contentMd5": "KMYh+0qU9/FDXf2TwCGbeg==",
            "contentType": "application/pdf",
            "fileName": "contract.pdf",
            "fileSize": 81008
        }),
    )?;

    let canonical = CanonicalRequest::from_path_and_query("POST", &action.path_and_query()?)
        .content_md5(&wxkit_rs::sign::content_md5(&action.body.bytes()))
        .content_type(action.body.content_type().unwrap_or_default());
    println!("string-to-sign:\n{}\n", canonical.string_to_sign());

    signer.sign_action(&mut action)?;
    for (name, value) in &action.headers {
        println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
    }

    let client = Client::default();
    match client.call_api::<serde_json::Value>(&action).await {
        Ok(data) => println!("\ndata: {data:#}"),
        Err(e) => eprintln!("\nrequest failed: {e}"),
    }
    Ok(())
}
