#![doc = r#"
wxkit-rs

Crypto, signing and request plumbing for WeChat-family (Official Account,
WeCom, Mini Program, WeChat Pay) and E-sign APIs.

Modules:
- padding / cipher: Zero, PKCS#5 and PKCS#7 padding over AES-CBC and AES-ECB.
- envelope: the `nonce | len | payload | receiver_id` callback envelope.
- callback: signature checks, echostr verification, encrypted replies.
- sign / esign / rsa_cipher / pay: HMAC, canonical string-to-sign, RSA, WeChat Pay v2/v3.
- client / response / token: HTTP actions, vendor error envelopes, access_token fetch.
- miniprogram: `code2session` and `encryptedData` decryption.
- errcode / keygen: errcode advice, Token and EncodingAESKey generation.

The library keeps no state between calls: no token cache, no retries. Callers
own both.

Quick usage:

```ignore
use wxkit_rs::{Auth, Client};
use wxkit_rs::callback::{CallbackConfig, CallbackCrypto};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = Client::default();
    let token = client
        .get_access_token(&Auth::WeCom {
            corp_id: "your_corp_id".into(),
            corp_secret: "your_corp_secret".into(),
        })
        .await?;
    println!("expires_in: {}", token.expires_in);

    let crypto = CallbackCrypto::new(CallbackConfig::from_env("WXKIT_CALLBACK")?)?;
    let reply = crypto.encrypt_reply("<xml>...</xml>", "1409659813", "1372623149")?;
    println!("{}", reply.to_xml());
    Ok(())
}
```
"#]

pub mod callback;
pub mod cipher;
pub mod client;
pub mod envelope;
pub mod errcode;
pub mod esign;
pub mod keygen;
pub mod miniprogram;
pub mod padding;
pub mod pay;
pub mod response;
pub mod rsa_cipher;
pub mod sign;
pub mod token;

pub use callback::{CallbackConfig, CallbackCrypto, CallbackError, EncryptedReply};
pub use cipher::{AesCbc, AesEcb, CryptoError};
pub use client::{Action, Body, Client, ClientConfig, Error, RawResponse, Result};
pub use envelope::AesKey;
pub use esign::{CanonicalRequest, EsignConfig, EsignSigner};
pub use padding::Padding;
pub use pay::{PayConfig, PaySigner, SignType};
pub use response::WxError;
pub use rsa_cipher::{RsaError, RsaPadding};
pub use token::{AccessToken, Auth};
