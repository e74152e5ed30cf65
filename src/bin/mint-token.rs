//! Dev helper: mint an HS256 bearer token for the hmac auth mode.

use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

#[derive(Parser)]
#[command(name = "mint-token", about = "Mint an HS256 bearer token")]
struct Args {
    /// Shared secret; must match auth.hmac_secret.
    #[arg(long, default_value = "dev-secret")]
    secret: String,

    /// Subject claim.
    #[arg(long, default_value = "user_123")]
    sub: String,

    /// Token lifetime in hours.
    #[arg(long, default_value_t = 24)]
    ttl_hours: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let claims = json!({
        "sub": args.sub,
        "iat": now,
        "exp": now + args.ttl_hours * 3600,
    });
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(args.secret.as_bytes()),
    )?;
    println!("{token}");
    Ok(())
}
