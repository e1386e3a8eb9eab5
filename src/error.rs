//! Error types for unison.

use thiserror::Error;

/// Main error type for unison operations.
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a text message.
    #[error("bad JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    /// Unknown binary frame discriminator.
    #[error("unknown binary frame type {0:#04x}")]
    UnknownType(u8),

    /// Binary frame shorter than its fixed header.
    #[error("truncated header: got {got} bytes, need {need}")]
    TruncatedHeader { got: usize, need: usize },

    /// Audio payload length does not match the declared sample count.
    #[error("data size mismatch: expected {expected} payload bytes, got {got}")]
    DataSizeMismatch { expected: usize, got: usize },

    /// Unknown media art format tag.
    #[error("unknown art format {0}")]
    UnknownFormat(u8),

    /// Sample data does not divide evenly into the session's channels.
    #[error("channel mismatch: {samples} samples across {channels} channels")]
    ChannelMismatch { samples: usize, channels: usize },

    /// Send attempted on a client whose transport is gone.
    #[error("client not connected")]
    ClientNotConnected,

    /// A text message arrived before `player/hello`.
    #[error("send message before player hello")]
    MessageBeforeHello,

    /// `start_session` while the group already has one.
    #[error("session already active")]
    SessionActive,

    /// Session operation on a group without an active session.
    #[error("no session active")]
    NoSessionActive,

    /// Referenced group does not exist.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// A client's send queue overflowed its bound.
    #[error("send queue full")]
    Backlog,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}
