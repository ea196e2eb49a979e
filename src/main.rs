use std::sync::Arc;
use svc::config::DEFAULT_BIND_ADDR;
use svc::server::{ws, SignalingRelay};

#[tokio::main]
async fn main() {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let relay = Arc::new(SignalingRelay::new());
    if let Err(e) = ws::run(&addr, relay).await {
        eprintln!("signaling server stopped: {e}");
        std::process::exit(1);
    }
}
