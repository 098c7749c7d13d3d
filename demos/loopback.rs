//! Loopback demo: two multiplexers wired back to back over an in-memory
//! duplex pipe. The dialer opens a named stream and the listener echoes
//! everything it reads.
//!
//! Run with:
//!
//! ```sh
//! RUST_LOG=debug cargo run --example loopback
//! ```

use mplex::{Multiplexer, MplexConfig, MplexError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (left, right) = tokio::io::duplex(64 * 1024);
    let dialer = Multiplexer::new(left, MplexConfig::default());
    let listener = Multiplexer::new(right, MplexConfig::default());

    let echo_server = tokio::spawn(async move {
        while let Some(mut stream) = listener.accept().await {
            println!("accepted stream {} ({})", stream.id(), stream.name());
            while let Some(chunk) = stream.read().await? {
                stream.write(&chunk).await?;
            }
            stream.close().await?;
        }
        Ok::<_, MplexError>(())
    });

    let mut stream = dialer.open_stream(Some("greeting")).await?;
    stream.write(b"hello over mplex").await?;
    stream.end().await?;

    let mut reply = Vec::new();
    while let Some(chunk) = stream.read().await? {
        reply.extend_from_slice(&chunk);
    }
    println!("echoed back: {}", String::from_utf8_lossy(&reply));

    dialer.close();
    echo_server.abort();
    Ok(())
}
