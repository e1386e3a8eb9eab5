//! WebSocket transport framing.
//!
//! Both sides of the protocol share one transport contract: a reliable,
//! message-framed channel carrying JSON text frames and opaque binary
//! frames. This module adapts a `tokio_tungstenite` stream to that
//! contract, generic over the underlying socket so tests can run over
//! in-memory duplex pipes.
//!
//! Use [`Connection`] unsplit where one task both reads and writes (the
//! player runner), or [`Connection::split`] for independent reader and
//! writer tasks (the server's per-client proxy).

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream, Stream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage, WebSocketConfig};
use tokio_tungstenite::{
    accept_async, client_async, connect_async_with_config, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// One frame off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    /// A UTF-8 JSON text message.
    Text(String),
    /// An opaque binary frame (see [`crate::frame`]).
    Binary(Bytes),
}

/// How a connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Ordinary teardown.
    Normal,
    /// The peer violated a policy (e.g. exceeded its send backlog).
    Policy,
    /// The peer broke the protocol (e.g. malformed JSON).
    Protocol,
}

fn close_frame(kind: CloseKind) -> Option<CloseFrame> {
    let (code, reason) = match kind {
        CloseKind::Normal => return None,
        CloseKind::Policy => (CloseCode::Policy, "send backlog exceeded"),
        CloseKind::Protocol => (CloseCode::Protocol, "protocol error"),
    };
    Some(CloseFrame {
        code,
        reason: reason.into(),
    })
}

/// A message-framed WebSocket connection.
pub struct Connection<S> {
    ws: WebSocketStream<S>,
}

impl Connection<MaybeTlsStream<TcpStream>> {
    /// Connect to a server at the given `ws://` / `wss://` endpoint.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        debug!(endpoint, "Connecting to WebSocket");

        let request = endpoint
            .into_client_request()
            .map_err(|e| Error::Protocol(format!("invalid endpoint URL: {e}")))?;

        let config = WebSocketConfig::default();
        let (ws, response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(Box::new)?;

        debug!(status = ?response.status(), "WebSocket connected");
        Ok(Self { ws })
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform the server side of the WebSocket handshake on an
    /// accepted socket.
    pub async fn accept(stream: S) -> Result<Self> {
        let ws = accept_async(stream).await.map_err(Box::new)?;
        Ok(Self { ws })
    }

    /// Perform the client side of the handshake over an arbitrary
    /// stream (tests drive in-memory pipes through this).
    pub async fn client(stream: S) -> Result<Self> {
        let request = "ws://local/"
            .into_client_request()
            .map_err(|e| Error::Protocol(format!("invalid endpoint URL: {e}")))?;
        let (ws, _response) = client_async(request, stream).await.map_err(Box::new)?;
        Ok(Self { ws })
    }

    /// Split into reader and writer halves for concurrent use.
    pub fn split(self) -> (ConnectionReader<S>, ConnectionWriter<S>) {
        let (sink, stream) = self.ws.split();
        (ConnectionReader { ws: stream }, ConnectionWriter { ws: sink })
    }

    /// Receive the next frame. Returns `None` once the peer closed.
    pub async fn recv(&mut self) -> Result<Option<RawFrame>> {
        while let Some(msg) = self.ws.next().await {
            match msg.map_err(Box::new)? {
                WsMessage::Text(text) => {
                    return Ok(Some(RawFrame::Text(text.as_str().to_owned())));
                }
                WsMessage::Binary(data) => {
                    return Ok(Some(RawFrame::Binary(data)));
                }
                WsMessage::Ping(data) => {
                    trace!("RX: Ping");
                    self.ws
                        .send(WsMessage::Pong(data))
                        .await
                        .map_err(Box::new)?;
                }
                WsMessage::Pong(_) => trace!("RX: Pong"),
                WsMessage::Close(_) => {
                    debug!("RX: Close");
                    return Ok(None);
                }
                WsMessage::Frame(frame) => trace!(?frame, "RX: Raw frame (unexpected)"),
            }
        }
        Ok(None)
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.ws
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        self.ws
            .send(WsMessage::Binary(data))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Gracefully close the connection.
    pub async fn close(&mut self, kind: CloseKind) -> Result<()> {
        debug!(?kind, "Closing WebSocket connection");
        self.ws.close(close_frame(kind)).await.map_err(Box::new)?;
        Ok(())
    }
}

/// Reader half of a split connection.
pub struct ConnectionReader<S> {
    ws: SplitStream<WebSocketStream<S>>,
}

impl<S> ConnectionReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Convert into an async stream of frames.
    ///
    /// The stream ends when the WebSocket closes.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<RawFrame>> {
        async_stream::try_stream! {
            while let Some(msg) = self.ws.next().await {
                match msg.map_err(Box::new)? {
                    WsMessage::Text(text) => {
                        yield RawFrame::Text(text.as_str().to_owned());
                    }
                    WsMessage::Binary(data) => {
                        yield RawFrame::Binary(data);
                    }
                    WsMessage::Close(_) => {
                        debug!("RX: Close");
                        break;
                    }
                    WsMessage::Ping(_) => {
                        // tungstenite queues the pong; it goes out with
                        // the writer half's next flush.
                        trace!("RX: Ping (auto-pong)");
                    }
                    WsMessage::Pong(_) => trace!("RX: Pong"),
                    WsMessage::Frame(frame) => trace!(?frame, "RX: Raw frame"),
                }
            }
        }
    }
}

/// Writer half of a split connection.
pub struct ConnectionWriter<S> {
    ws: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> ConnectionWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a text frame.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.ws
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        self.ws
            .send(WsMessage::Binary(data))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Close the connection, carrying a close code for non-normal
    /// kinds.
    pub async fn close(&mut self, kind: CloseKind) {
        debug!(?kind, "Closing WebSocket connection");
        if let Some(frame) = close_frame(kind) {
            if let Err(e) = self.ws.send(WsMessage::Close(Some(frame))).await {
                warn!(error = %e, "Failed to send close frame");
                return;
            }
        }
        if let Err(e) = self.ws.close().await {
            trace!(error = %e, "Close handshake did not complete cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Handshake a client/server pair over an in-memory duplex pipe.
    async fn pipe() -> (Connection<tokio::io::DuplexStream>, Connection<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(Connection::accept(a));
        let client = Connection::client(b).await.unwrap();
        let server = server.await.unwrap().unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn text_frames_round_trip() {
        let (mut client, mut server) = pipe().await;

        client.send_text("{\"hello\":1}".to_string()).await.unwrap();
        let frame = server.recv().await.unwrap().unwrap();
        assert_eq!(frame, RawFrame::Text("{\"hello\":1}".to_string()));
    }

    #[tokio::test]
    async fn binary_frames_round_trip() {
        let (mut client, mut server) = pipe().await;

        server
            .send_binary(Bytes::from_static(&[1, 2, 3]))
            .await
            .unwrap();
        let frame = client.recv().await.unwrap().unwrap();
        assert_eq!(frame, RawFrame::Binary(Bytes::from_static(&[1, 2, 3])));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (mut client, mut server) = pipe().await;

        client.close(CloseKind::Normal).await.unwrap();
        assert!(server.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn split_reader_sees_writer_frames() {
        let (client, mut server) = pipe().await;
        let (reader, mut writer) = client.split();
        let stream = reader.into_stream();
        tokio::pin!(stream);

        writer.send_text("ping".to_string()).await.unwrap();
        assert_eq!(
            server.recv().await.unwrap().unwrap(),
            RawFrame::Text("ping".to_string())
        );

        server.send_text("pong".to_string()).await.unwrap();
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame, RawFrame::Text("pong".to_string()));
    }
}
