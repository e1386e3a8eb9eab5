//! Configuration types for servers and players.

use std::net::SocketAddr;

use md5::{Digest, Md5};
use uuid::Uuid;

use crate::types::{DisplaySize, PlayerInfo, ServerInfo};

/// Default port servers bind to.
pub const DEFAULT_PORT: u16 = 8927;

/// Default advertised buffer capacity, in bytes.
pub const DEFAULT_BUFFER_CAPACITY: u64 = 4 * 1024 * 1024;

/// Configuration for a [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Stable server id, fresh per construction.
    pub server_id: String,
    /// Human-readable server name.
    pub name: String,
    /// Address `Server::bind` listens on.
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            server_id: Uuid::new_v4().to_string(),
            name: name.into(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }

    /// Override the listen address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// The identity sent in `source/hello`.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.server_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Configuration for a [`Player`](crate::Player).
///
/// The player id is derived deterministically from the name, so the
/// same name always presents the same identity to servers across
/// restarts.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Stable player id.
    pub player_id: String,
    /// Human-readable player name.
    pub name: String,
    /// Endpoint role, "player" for plain receivers.
    pub role: String,
    /// Advertised buffer capacity in bytes.
    pub buffer_capacity: u64,
    pub supported_codecs: Vec<String>,
    pub supported_channels: Vec<u8>,
    pub supported_sample_rates: Vec<u32>,
    pub supported_bit_depths: Vec<u8>,
    pub supported_stream_types: Vec<String>,
    pub supported_picture_formats: Vec<String>,
    /// Display geometry, if the player has a screen.
    pub display: Option<DisplaySize>,
}

impl PlayerConfig {
    /// Create a player configuration with an id derived from the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut hasher = Md5::new();
        hasher.update(format!("unison:{name}").as_bytes());
        let digest: [u8; 16] = hasher.finalize().into();
        let player_id = Uuid::from_bytes(digest).simple().to_string();

        Self {
            player_id,
            name,
            role: "player".to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            supported_codecs: vec!["pcm".to_string()],
            supported_channels: vec![1, 2],
            supported_sample_rates: vec![44_100, 48_000],
            supported_bit_depths: vec![16],
            supported_stream_types: vec!["music".to_string()],
            supported_picture_formats: vec!["jpeg".to_string(), "png".to_string()],
            display: None,
        }
    }

    /// Create a player configuration with an explicit id.
    pub fn with_id(player_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            ..Self::new(name)
        }
    }

    /// Override the endpoint role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Override the advertised buffer capacity.
    pub fn buffer_capacity(mut self, bytes: u64) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Advertise display geometry.
    pub fn display(mut self, width: u32, height: u32) -> Self {
        self.display = Some(DisplaySize { width, height });
        self
    }

    /// The capability descriptor sent in `player/hello`.
    pub fn player_info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.player_id.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            buffer_capacity: self.buffer_capacity,
            supported_codecs: self.supported_codecs.clone(),
            supported_channels: self.supported_channels.clone(),
            supported_sample_rates: self.supported_sample_rates.clone(),
            supported_bit_depths: self.supported_bit_depths.clone(),
            supported_stream_types: self.supported_stream_types.clone(),
            supported_picture_formats: self.supported_picture_formats.clone(),
            display: self.display,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_is_deterministic_per_name() {
        let a = PlayerConfig::new("Living Room");
        let b = PlayerConfig::new("Living Room");
        let c = PlayerConfig::new("Kitchen");

        assert_eq!(a.player_id, b.player_id);
        assert_ne!(a.player_id, c.player_id);
    }

    #[test]
    fn server_ids_are_unique_per_run() {
        let a = ServerConfig::new("srv");
        let b = ServerConfig::new("srv");
        assert_ne!(a.server_id, b.server_id);
    }

    #[test]
    fn defaults_advertise_pcm_16bit() {
        let info = PlayerConfig::new("p").player_info();
        assert_eq!(info.supported_codecs, vec!["pcm"]);
        assert_eq!(info.supported_bit_depths, vec![16]);
        assert!(info.display.is_none());
    }
}
