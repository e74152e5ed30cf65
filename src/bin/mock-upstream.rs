//! Dev helper: an upstream that echoes request details as JSON, with an
//! optional artificial delay per request.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::Json;
use axum::Router;
use clap::Parser;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mock-upstream", about = "Echoing upstream for gateway development")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:9001")]
    addr: SocketAddr,

    /// Service name reported in responses.
    #[arg(long, default_value = "upstream")]
    name: String,

    /// Artificial delay per request, in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

#[derive(Clone)]
struct Echo {
    name: String,
    delay: Duration,
}

async fn echo(State(state): State<Echo>, req: Request) -> Json<Value> {
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let headers: Value = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                Value::from(v.to_str().unwrap_or("<binary>")),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();
    Json(json!({
        "service": state.name,
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "query": req.uri().query().unwrap_or(""),
        "headers": headers,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let app = Router::new().fallback(echo).with_state(Echo {
        name: args.name,
        delay: Duration::from_millis(args.delay_ms),
    });
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    println!("mock-upstream listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
