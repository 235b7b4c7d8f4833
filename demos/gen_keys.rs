//! Generate callback credentials, or check an existing EncodingAESKey.
//!
//! ```bash
//! cargo run --example gen_keys
//! cargo run --example gen_keys -- verify <43-char-key>
//! ```

use std::env;
use std::process;

use wxkit_rs::keygen::{
    generate_encoding_aes_key, generate_nonce, generate_token, verify_encoding_aes_key,
};

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [cmd, key] if cmd == "verify" => {
            if verify_encoding_aes_key(key) {
                println!("ok: key decodes to 32 bytes");
            } else {
                eprintln!("invalid: expected 43 characters decoding to 32 bytes");
                process::exit(1);
            }
        }
        [] => {
            println!("Token:          {}", generate_token(32));
            println!("EncodingAESKey: {}", generate_encoding_aes_key());
            println!("Nonce:          {}", generate_nonce());
        }
        _ => {
            eprintln!("usage: gen_keys [verify <key>]");
            process::exit(2);
        }
    }
}
