//! # Unison
//!
//! Synchronized multi-room audio streaming: a server that fans
//! timestamped PCM out to groups of receivers, and the player that
//! schedules those samples against a shared clock so every room plays
//! the same frame at the same instant.
//!
//! ## Quick Start: serving
//!
//! ```ignore
//! use unison::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> unison::Result<()> {
//!     let config = ServerConfig::new("My Server")
//!         .bind_addr("0.0.0.0:8927".parse().unwrap());
//!     let (server, mut events) = Server::bind(config).await?;
//!
//!     server.add_group("main").await?;
//!     server.start_session("main", "pcm", 48_000, 2, 16).await?;
//!
//!     // Feed interleaved int16 samples, stamped half a second ahead
//!     // so receivers have room to schedule.
//!     let at = server.now_us() + 500_000;
//!     server.send_audio("main", at, samples).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Quick Start: receiving
//!
//! ```ignore
//! use unison::{NullOutput, Player, PlayerConfig, PlayerEvent};
//!
//! #[tokio::main]
//! async fn main() -> unison::Result<()> {
//!     let config = PlayerConfig::new("Living Room");
//!     let (player, mut events) =
//!         Player::connect("ws://192.168.1.10:8927", config, NullOutput::new()).await?;
//!     player.join_group("main").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod msg;
pub mod output;
pub mod pcm;
pub mod timesync;
pub mod types;

// Internal modules
pub(crate) mod client;
pub(crate) mod group;
pub(crate) mod session;
pub(crate) mod transport;

mod player;
mod server;

// Re-export the main public API
pub use config::{PlayerConfig, ServerConfig};
pub use output::{AudioOutput, NullOutput};
pub use player::{Player, PlayerEvent, PlayerHandle};
pub use server::{Server, ServerEvent, ServerHandle};

pub use error::Error;
pub use types::*;

/// Result type for unison operations.
pub type Result<T> = std::result::Result<T, Error>;
