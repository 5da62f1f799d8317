//! Frame bridge host server.
//!
//! Accepts one client on the configured port, scales each incoming frame
//! with the software engine and streams the result back.
//!
//! ```text
//! FRAMEBRIDGE_CONFIG=bridge.json RUST_LOG=debug cargo run --example bridge_server
//! ```

use framebridge::config::BridgeConfig;
use framebridge::hal::{CoherentCache, SoftwareEngine};
use framebridge::BridgeBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("framebridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::var("FRAMEBRIDGE_CONFIG") {
        Ok(path) => BridgeConfig::load(&path).unwrap_or_else(|e| {
            tracing::warn!(%path, "Config unusable ({}), using defaults", e);
            BridgeConfig::default()
        }),
        Err(_) => BridgeConfig::default(),
    };
    tracing::info!(
        input = config.input.frame_bytes(),
        output = config.output.frame_bytes(),
        slots = config.ring_slots,
        "Frame pipeline configured"
    );

    let engine = SoftwareEngine::new(config.input, config.output);
    let mut bridge = BridgeBuilder::new()
        .config(config.clone())
        .build(engine, CoherentCache)?;

    let listener = framebridge::transport::bind(&config).await?;
    framebridge::transport::serve(&listener, &mut bridge).await?;

    Ok(())
}
