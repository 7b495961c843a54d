use std::env;

use anyhow::{Context, Result};
use xgnarly_rs::{TokenRequest, build_token};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <query> [body] [user_agent] [timestamp_ms] [version]",
            args[0]
        );
        eprintln!("  query: form-encoded query string, exactly as sent");
        eprintln!("  body: request body (default: empty)");
        eprintln!("  user_agent: User-Agent header value");
        eprintln!("  timestamp_ms: millisecond timestamp (default: now)");
        eprintln!("  version: 5.1.1 or 5.1.0 (default: 5.1.1)");
        std::process::exit(1);
    }

    let mut request = TokenRequest::new(
        args[1].as_str(),
        args.get(2).map(String::as_str).unwrap_or(""),
        args.get(3).map(String::as_str).unwrap_or(""),
    );
    if let Some(ts) = args.get(4) {
        let ts = ts
            .parse()
            .with_context(|| format!("Invalid timestamp_ms: {}", ts))?;
        request = request.with_timestamp_ms(ts);
    }
    if let Some(version) = args.get(5) {
        request = request.with_version(version.as_str());
    }

    let token = build_token(&request).context("Failed to build token")?;

    let payload_hex: String = token
        .payload()
        .as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    println!("timestamp_ms:  {}", token.timestamp_ms());
    println!("payload ({}):  {}", token.payload().len(), payload_hex);
    println!("key words:     {:?}", token.key().words());
    println!("rounds:        {}", token.rounds());
    println!("insert offset: {}", token.insert_offset());
    println!("ciphertext:    {}", token.ciphertext_hex());
    println!("token:         {}", token.encode());

    Ok(())
}
