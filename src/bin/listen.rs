//! Demo receiver: joins the "main" group and logs what it would play.
//!
//! Usage: `unison-listen [ws://host:port] [player name]`

use tracing::info;
use tracing_subscriber::EnvFilter;
use unison::{NullOutput, Player, PlayerConfig, PlayerEvent};

#[tokio::main]
async fn main() -> unison::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8927".to_string());
    let name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "Demo Player".to_string());

    info!(endpoint = %endpoint, player = %name, "Connecting");
    let (player, mut events) =
        Player::connect(&endpoint, PlayerConfig::new(name), NullOutput::new()).await?;
    player.join_group("main").await?;

    while let Some(event) = events.recv().await {
        match event {
            PlayerEvent::Close { expected } => {
                info!(expected, "Connection closed");
                break;
            }
            event => info!(?event, "player event"),
        }
    }
    Ok(())
}
