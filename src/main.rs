//! sockrpc demo - calls every operation of a running RPC server.
//!
//! Usage: `sockrpc-demo [SOCKET_PATH]` (default `/tmp/rpc_socket`).
//! Set `RUST_LOG=sockrpc=trace` to see the payloads on the wire.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sockrpc::{RemoteMethods, RpcClient, RpcError, DEFAULT_SOCKET_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sockrpc=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let socket_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());
    tracing::info!("Using server socket {}", socket_path);

    let client = RpcClient::new(&socket_path);

    if let Err(e) = run_examples(&client).await {
        tracing::error!("Demo failed: {}", e);
        return Err(e);
    }

    println!("Calling an unregistered method:");
    match expect_server_error(client.call("nonexistent", vec![], vec![]).await) {
        Ok(message) => println!("  Error handling works: {}\n", message),
        Err(e) => {
            tracing::error!("Demo failed: {:#}", e);
            return Err(e);
        }
    }

    Ok(())
}

/// Only a failure reported by the server itself counts as handled.
fn expect_server_error(outcome: Result<Value, RpcError>) -> Result<String> {
    match outcome {
        Err(RpcError::Server { message }) => Ok(message),
        Err(other) => Err(other).context("unregistered method did not yield a server error"),
        Ok(value) => bail!("unregistered method returned {}", value),
    }
}

async fn run_examples(client: &RpcClient) -> Result<()> {
    println!("floor(3.7):");
    println!("  Result: {}\n", client.floor(3.7).await?);

    println!("reverse(\"hello\"):");
    println!("  Result: {}\n", client.reverse("hello").await?);

    println!("sort([\"banana\", \"apple\", \"cherry\"]):");
    let sorted = client.sort(&["banana", "apple", "cherry"]).await?;
    println!("  Result: {:?}\n", sorted);

    println!("validAnagram(\"listen\", \"silent\"):");
    println!("  Result: {}\n", client.valid_anagram("listen", "silent").await?);

    println!("nroot(2, 9):");
    println!("  Result: {}\n", client.nroot(2, 9).await?);

    Ok(())
}
