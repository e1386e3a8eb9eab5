//! Demo server: streams a 440 Hz tone to the "main" group.
//!
//! Run with `RUST_LOG=debug` to watch the protocol traffic.

use std::f32::consts::TAU;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use unison::{Server, ServerConfig};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u8 = 2;
/// 25 ms of audio per chunk.
const CHUNK_FRAMES: usize = 1_200;
/// Stamp chunks half a second ahead so receivers can schedule.
const LEAD_US: i64 = 500_000;

#[tokio::main]
async fn main() -> unison::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::new("Unison Demo").bind_addr("0.0.0.0:8927".parse().unwrap());
    let (server, mut events) = Server::bind(config).await?;
    server.add_group("main").await?;
    server
        .start_session("main", "pcm", SAMPLE_RATE, CHANNELS, 16)
        .await?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "server event");
        }
    });

    let mut phase = 0.0f32;
    let step = 440.0 * TAU / SAMPLE_RATE as f32;
    let chunk_us = (CHUNK_FRAMES as i64 * 1_000_000) / SAMPLE_RATE as i64;
    let mut next_timestamp = server.now_us() + LEAD_US;
    let mut ticker = tokio::time::interval(Duration::from_millis(25));

    info!("Streaming 440 Hz tone to group \"main\"");
    loop {
        ticker.tick().await;

        let mut samples = Vec::with_capacity(CHUNK_FRAMES * CHANNELS as usize);
        for _ in 0..CHUNK_FRAMES {
            let value = (phase.sin() * 0.2 * 32767.0) as i16;
            phase = (phase + step) % TAU;
            for _ in 0..CHANNELS {
                samples.push(value);
            }
        }

        server.send_audio("main", next_timestamp, samples).await?;
        next_timestamp += chunk_us;
    }
}
