//! Top-level server.
//!
//! The [`Server`] owns the group list and client map on a single
//! reactor task; every mutation of group or session state happens
//! there. A cheap [`ServerHandle`] talks to the reactor over channels,
//! which is also how the embedding application feeds audio, metadata
//! and art into a group's session.
//!
//! # Example
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
//!     let at = server.now_us() + 500_000;
//!     server.send_audio("main", at, samples).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::client::{Client, ClientEvent, GroupCommand};
use crate::config::ServerConfig;
use crate::group::Group;
use crate::msg::{GroupList, ServerMessage};
use crate::timesync::ServerClock;
use crate::transport::Connection;
use crate::types::{
    ArtFormat, ClientId, GroupEntry, Metadata, PlayerInfo, PlayerState, ServerInfo, SessionInfo,
    StreamCommand,
};
use crate::{Error, Result};

/// Events the server re-emits toward the embedding application.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client completed its hello and was recorded.
    ClientConnected {
        client_id: ClientId,
        info: PlayerInfo,
    },
    /// A client's transport went away and it was forgotten.
    ClientClosed { client_id: ClientId },
    /// A client joined a group.
    ClientAdded {
        group_id: String,
        client_id: ClientId,
    },
    /// A client left a group.
    ClientRemoved {
        group_id: String,
        client_id: ClientId,
    },
    /// A session ended (explicitly or via `stop`).
    SessionEnded {
        group_id: String,
        session_id: String,
    },
    /// A session-active client sent a media command.
    StreamCommand {
        group_id: String,
        client_id: ClientId,
        command: StreamCommand,
    },
    /// A session-active client reported playback state.
    PlayerState {
        group_id: String,
        client_id: ClientId,
        state: PlayerState,
    },
}

enum ServerCommand {
    AddGroup {
        group_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    StartSession {
        group_id: String,
        codec: String,
        sample_rate: u32,
        channels: u8,
        bit_depth: u8,
        reply: oneshot::Sender<Result<SessionInfo>>,
    },
    EndSession {
        group_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SendAudio {
        group_id: String,
        timestamp_us: i64,
        samples: Vec<i16>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendAudioPlanes {
        group_id: String,
        timestamp_us: i64,
        planes: Vec<Vec<f32>>,
        reply: oneshot::Sender<Result<()>>,
    },
    SendMetadata {
        group_id: String,
        metadata: Metadata,
        reply: oneshot::Sender<Result<()>>,
    },
    SendArt {
        group_id: String,
        format: ArtFormat,
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// The server entry points.
pub struct Server;

impl Server {
    /// Start a server reactor without a listener. Connections are fed
    /// in through [`ServerHandle::attach`]; the reactor runs until
    /// [`ServerHandle::stop`] or until every handle is dropped.
    pub fn start(config: ServerConfig) -> (ServerHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (register_tx, register_rx) = mpsc::channel(16);
        let (client_events_tx, client_events_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let clock = ServerClock::new();
        let info = config.server_info();

        let runner = ServerRunner {
            groups: HashMap::new(),
            clients: HashMap::new(),
            command_rx,
            register_rx,
            client_events_rx,
            events: event_tx,
            clock,
        };
        tokio::spawn(runner.run());

        let handle = ServerHandle {
            command_tx,
            register_tx,
            client_events_tx,
            info,
            clock,
            local_addr: None,
        };
        (handle, event_rx)
    }

    /// Start a server and listen for WebSocket connections on the
    /// configured address.
    pub async fn bind(
        config: ServerConfig,
    ) -> Result<(ServerHandle, mpsc::UnboundedReceiver<ServerEvent>)> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, server = %config.name, "Server listening");

        let (mut handle, events) = Self::start(config);
        handle.local_addr = Some(local_addr);

        let accept_handle = handle.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Connection accepted");
                        accept_handle.attach(stream);
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        break;
                    }
                }
            }
        });

        Ok((handle, events))
    }
}

/// Handle to a running server reactor. Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    command_tx: mpsc::Sender<ServerCommand>,
    register_tx: mpsc::Sender<Client>,
    client_events_tx: mpsc::UnboundedSender<(ClientId, ClientEvent)>,
    info: ServerInfo,
    clock: ServerClock,
    local_addr: Option<SocketAddr>,
}

impl ServerHandle {
    /// Take ownership of an accepted socket: perform the WebSocket
    /// handshake, wait for `player/hello`, then record the client.
    ///
    /// Returns immediately; the handshake runs in a background task.
    pub fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let info = self.info.clone();
        let clock = self.clock;
        let client_events_tx = self.client_events_tx.clone();
        let register_tx = self.register_tx.clone();

        tokio::spawn(async move {
            let conn = match Connection::accept(stream).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(error = %e, "WebSocket handshake failed");
                    return;
                }
            };
            match Client::accept(conn, info, clock, client_events_tx).await {
                Ok(client) => {
                    if register_tx.send(client).await.is_err() {
                        debug!("Server reactor gone, dropping accepted client");
                    }
                }
                Err(e) => debug!(error = %e, "Client accept failed"),
            }
        });
    }

    /// Create a group. Groups exist until the server stops.
    pub async fn add_group(&self, group_id: impl Into<String>) -> Result<()> {
        self.command(|reply| ServerCommand::AddGroup {
            group_id: group_id.into(),
            reply,
        })
        .await?
    }

    /// Start a session in a group. Fails if one is already active.
    pub async fn start_session(
        &self,
        group_id: impl Into<String>,
        codec: impl Into<String>,
        sample_rate: u32,
        channels: u8,
        bit_depth: u8,
    ) -> Result<SessionInfo> {
        self.command(|reply| ServerCommand::StartSession {
            group_id: group_id.into(),
            codec: codec.into(),
            sample_rate,
            channels,
            bit_depth,
            reply,
        })
        .await?
    }

    /// End a group's active session.
    pub async fn end_session(&self, group_id: impl Into<String>) -> Result<()> {
        self.command(|reply| ServerCommand::EndSession {
            group_id: group_id.into(),
            reply,
        })
        .await?
    }

    /// Fan one audio chunk out to a group's session. `samples` are
    /// interleaved int16; `timestamp_us` is the server-clock instant at
    /// which sample 0 plays (see [`ServerHandle::now_us`]).
    pub async fn send_audio(
        &self,
        group_id: impl Into<String>,
        timestamp_us: i64,
        samples: Vec<i16>,
    ) -> Result<()> {
        self.command(|reply| ServerCommand::SendAudio {
            group_id: group_id.into(),
            timestamp_us,
            samples,
            reply,
        })
        .await?
    }

    /// Like [`ServerHandle::send_audio`], from per-channel float
    /// planes.
    pub async fn send_audio_planes(
        &self,
        group_id: impl Into<String>,
        timestamp_us: i64,
        planes: Vec<Vec<f32>>,
    ) -> Result<()> {
        self.command(|reply| ServerCommand::SendAudioPlanes {
            group_id: group_id.into(),
            timestamp_us,
            planes,
            reply,
        })
        .await?
    }

    /// Report the current metadata for a group's session. Only changed
    /// fields reach the wire.
    pub async fn send_metadata(
        &self,
        group_id: impl Into<String>,
        metadata: Metadata,
    ) -> Result<()> {
        self.command(|reply| ServerCommand::SendMetadata {
            group_id: group_id.into(),
            metadata,
            reply,
        })
        .await?
    }

    /// Send media art for a group's session.
    pub async fn send_art(
        &self,
        group_id: impl Into<String>,
        format: ArtFormat,
        data: Bytes,
    ) -> Result<()> {
        self.command(|reply| ServerCommand::SendArt {
            group_id: group_id.into(),
            format,
            data,
            reply,
        })
        .await?
    }

    /// End all active sessions and shut the reactor down.
    pub async fn stop(&self) -> Result<()> {
        self.command(|reply| ServerCommand::Stop { reply }).await
    }

    /// Current server monotonic clock, in microseconds.
    pub fn now_us(&self) -> i64 {
        self.clock.now_us()
    }

    /// The identity sent to clients in `source/hello`.
    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// The bound listen address, when started via [`Server::bind`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ServerCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::Protocol("server stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Protocol("server stopped".to_string()))
    }
}

// ============================================================================
// Server Runner (the reactor task)
// ============================================================================

struct ServerRunner {
    groups: HashMap<String, Group>,
    clients: HashMap<ClientId, Client>,
    command_rx: mpsc::Receiver<ServerCommand>,
    register_rx: mpsc::Receiver<Client>,
    client_events_rx: mpsc::UnboundedReceiver<(ClientId, ClientEvent)>,
    events: mpsc::UnboundedSender<ServerEvent>,
    clock: ServerClock,
}

impl ServerRunner {
    async fn run(mut self) {
        info!("Server reactor starting");

        loop {
            // Biased so registrations are recorded before any event the
            // fresh client may already have produced.
            tokio::select! {
                biased;
                client = self.register_rx.recv() => match client {
                    Some(client) => self.register(client),
                    None => break,
                },
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                event = self.client_events_rx.recv() => match event {
                    Some((client_id, event)) => self.route_client_event(client_id, event),
                    None => break,
                },
            }
        }

        info!("Server reactor stopped");
    }

    /// Returns true when the reactor should exit.
    fn handle_command(&mut self, cmd: ServerCommand) -> bool {
        match cmd {
            ServerCommand::AddGroup { group_id, reply } => {
                let result = if self.groups.contains_key(&group_id) {
                    Err(Error::Protocol(format!("group already exists: {group_id}")))
                } else {
                    info!(group_id = %group_id, "Group added");
                    self.groups.insert(
                        group_id.clone(),
                        Group::new(group_id, self.clock, self.events.clone()),
                    );
                    Ok(())
                };
                let _ = reply.send(result);
            }
            ServerCommand::StartSession {
                group_id,
                codec,
                sample_rate,
                channels,
                bit_depth,
                reply,
            } => {
                let result = self.with_group(&group_id, |group| {
                    group.start_session(codec, sample_rate, channels, bit_depth)
                });
                let _ = reply.send(result);
            }
            ServerCommand::EndSession { group_id, reply } => {
                let _ = reply.send(self.with_group(&group_id, Group::end_session));
            }
            ServerCommand::SendAudio {
                group_id,
                timestamp_us,
                samples,
                reply,
            } => {
                let _ = reply.send(self.with_group(&group_id, |group| {
                    group.send_audio(timestamp_us, &samples)
                }));
            }
            ServerCommand::SendAudioPlanes {
                group_id,
                timestamp_us,
                planes,
                reply,
            } => {
                let _ = reply.send(self.with_group(&group_id, |group| {
                    group.send_audio_planes(timestamp_us, &planes)
                }));
            }
            ServerCommand::SendMetadata {
                group_id,
                metadata,
                reply,
            } => {
                let _ = reply.send(
                    self.with_group(&group_id, |group| group.send_metadata(&metadata)),
                );
            }
            ServerCommand::SendArt {
                group_id,
                format,
                data,
                reply,
            } => {
                let _ = reply.send(
                    self.with_group(&group_id, |group| group.send_art(format, &data)),
                );
            }
            ServerCommand::Stop { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn with_group<T>(
        &mut self,
        group_id: &str,
        f: impl FnOnce(&mut Group) -> Result<T>,
    ) -> Result<T> {
        match self.groups.get_mut(group_id) {
            Some(group) => f(group),
            None => Err(Error::UnknownGroup(group_id.to_string())),
        }
    }

    fn register(&mut self, client: Client) {
        let client_id = client.id();
        let Some(info) = client.player_info() else {
            // accept() only returns after the hello, so this cannot
            // trigger; guard anyway rather than panic the reactor.
            warn!(client_id = %client_id, "Registered client without hello, dropping");
            return;
        };
        info!(client_id = %client_id, player = %info.name, "Client registered");
        self.clients.insert(client_id, client);
        let _ = self
            .events
            .send(ServerEvent::ClientConnected { client_id, info });
    }

    fn route_client_event(&mut self, client_id: ClientId, event: ClientEvent) {
        match event {
            ClientEvent::GroupCommand(GroupCommand::Join { group_id }) => {
                self.handle_join(client_id, group_id);
            }
            ClientEvent::GroupCommand(GroupCommand::Unjoin) => {
                self.leave_current_group(client_id);
            }
            ClientEvent::GroupCommand(GroupCommand::List) => {
                self.send_group_list(client_id);
            }
            ClientEvent::Closed { cause } => {
                debug!(client_id = %client_id, ?cause, "Client closed");
                self.leave_current_group(client_id);
                if self.clients.remove(&client_id).is_some() {
                    let _ = self.events.send(ServerEvent::ClientClosed { client_id });
                }
            }
            // Session-scoped events reach the application through the
            // session's own bindings.
            ClientEvent::PlayerState(_) | ClientEvent::StreamCommand(_) => {}
        }
    }

    fn handle_join(&mut self, client_id: ClientId, group_id: String) {
        if !self.groups.contains_key(&group_id) {
            warn!(client_id = %client_id, group_id = %group_id, "group/join for unknown group, ignoring");
            return;
        }
        if self
            .groups
            .get(&group_id)
            .is_some_and(|group| group.contains(client_id))
        {
            debug!(client_id = %client_id, group_id = %group_id, "Already in group");
            return;
        }
        let Some(client) = self.clients.get(&client_id).cloned() else {
            warn!(client_id = %client_id, "group/join from unknown client, ignoring");
            return;
        };

        // At most one group per client.
        self.leave_current_group(client_id);
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.add_client(client);
        }
    }

    fn leave_current_group(&mut self, client_id: ClientId) {
        for group in self.groups.values_mut() {
            if group.contains(client_id) {
                group.remove_client(client_id);
                return;
            }
        }
    }

    fn send_group_list(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let mut groups: Vec<GroupEntry> = self
            .groups
            .values()
            .map(|group| GroupEntry {
                group_id: group.id().to_string(),
                state: group.state(),
            })
            .collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));

        if let Err(e) = client.send(&ServerMessage::GroupList(GroupList { groups })) {
            debug!(client_id = %client_id, error = %e, "group/list send failed");
        }
    }

    fn shutdown(&mut self) {
        info!("Server stopping");
        for group in self.groups.values_mut() {
            match group.end_session() {
                Ok(()) => {}
                Err(Error::NoSessionActive) => {}
                Err(e) => warn!(group_id = %group.id(), error = %e, "end_session failed"),
            }
        }
        for client in self.clients.values() {
            client.close();
        }
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{self, BinaryFrame};
    use crate::msg::{ClientMessage, Empty, GroupJoin};
    use crate::transport::RawFrame;
    use crate::types::{GroupState, RepeatMode};
    use crate::PlayerConfig;
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::MaybeTlsStream;

    /// A protocol-level test player speaking raw frames.
    struct TestPlayer {
        conn: Connection<MaybeTlsStream<TcpStream>>,
    }

    impl TestPlayer {
        async fn connect(handle: &ServerHandle, name: &str) -> Self {
            let addr = handle.local_addr().unwrap();
            let mut conn = Connection::connect(&format!("ws://{addr}")).await.unwrap();
            let hello = ClientMessage::PlayerHello(PlayerConfig::new(name).player_info());
            conn.send_text(hello.to_json().unwrap()).await.unwrap();

            let mut player = Self { conn };
            match player.recv_msg().await {
                ServerMessage::SourceHello(_) => {}
                other => panic!("expected source/hello, got {other:?}"),
            }
            player
        }

        async fn send(&mut self, msg: ClientMessage) {
            self.conn.send_text(msg.to_json().unwrap()).await.unwrap();
        }

        async fn join(&mut self, group_id: &str) {
            self.send(ClientMessage::GroupJoin(GroupJoin {
                group_id: group_id.to_string(),
            }))
            .await;
        }

        async fn recv_frame(&mut self) -> RawFrame {
            timeout(Duration::from_secs(5), self.conn.recv())
                .await
                .expect("recv timed out")
                .unwrap()
                .expect("connection closed")
        }

        async fn recv_msg(&mut self) -> ServerMessage {
            match self.recv_frame().await {
                RawFrame::Text(text) => ServerMessage::from_json(&text).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        async fn expect_silence(&mut self, for_ms: u64) {
            let result = timeout(Duration::from_millis(for_ms), self.conn.recv()).await;
            assert!(result.is_err(), "expected no frame, got {result:?}");
        }
    }

    async fn start_server() -> (ServerHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let config = ServerConfig::new("test server").bind_addr("127.0.0.1:0".parse().unwrap());
        Server::bind(config).await.unwrap()
    }

    async fn wait_for_event(
        events: &mut mpsc::UnboundedReceiver<ServerEvent>,
        mut check: impl FnMut(&ServerEvent) -> bool,
    ) -> ServerEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if check(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event wait timed out")
    }

    fn test_metadata() -> Metadata {
        Metadata {
            title: Some("A".to_string()),
            repeat: RepeatMode::Off,
            shuffle: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn late_join_inherits_session_state_in_order() {
        let (server, mut events) = start_server().await;
        server.add_group("main").await.unwrap();

        let mut first = TestPlayer::connect(&server, "first").await;
        first.join("main").await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;

        let session = server
            .start_session("main", "pcm", 44_100, 2, 16)
            .await
            .unwrap();
        server.send_metadata("main", test_metadata()).await.unwrap();
        server
            .send_art("main", ArtFormat::Png, Bytes::from_static(b"png"))
            .await
            .unwrap();
        server.send_audio("main", 1_000, vec![1, 2]).await.unwrap();

        // First client saw the whole sequence.
        let _start = first.recv_msg().await;
        let _meta = first.recv_msg().await;
        let _art = first.recv_frame().await;
        let _chunk = first.recv_frame().await;

        // A second client connects late and joins.
        let mut second = TestPlayer::connect(&server, "second").await;
        second.join("main").await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;

        server.send_audio("main", 2_000, vec![3, 4]).await.unwrap();

        // Expected exactly in order: session/start with the same id,
        // full metadata, the PNG art, then the next chunk.
        match second.recv_msg().await {
            ServerMessage::SessionStart(info) => {
                assert_eq!(info.session_id, session.session_id);
                assert_eq!(info.sample_rate, 44_100);
                assert_eq!(info.channels, 2);
                assert_eq!(info.bit_depth, 16);
            }
            other => panic!("expected session/start, got {other:?}"),
        }
        match second.recv_msg().await {
            ServerMessage::MetadataUpdate(update) => {
                assert_eq!(update.title, Some("A".to_string()));
                assert_eq!(update.repeat, Some(RepeatMode::Off));
                assert_eq!(update.shuffle, Some(false));
            }
            other => panic!("expected metadata/update, got {other:?}"),
        }
        match second.recv_frame().await {
            RawFrame::Binary(data) => match frame::decode(data, 2).unwrap() {
                BinaryFrame::MediaArt { format, .. } => assert_eq!(format, ArtFormat::Png),
                other => panic!("expected media art, got {other:?}"),
            },
            other => panic!("expected binary frame, got {other:?}"),
        }
        match second.recv_frame().await {
            RawFrame::Binary(data) => match frame::decode(data, 2).unwrap() {
                BinaryFrame::AudioChunk {
                    timestamp_us,
                    samples,
                } => {
                    assert_eq!(timestamp_us, 2_000);
                    assert_eq!(samples, vec![3, 4]);
                }
                other => panic!("expected audio chunk, got {other:?}"),
            },
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn group_leave_ends_session_for_that_client_only() {
        let (server, mut events) = start_server().await;
        server.add_group("main").await.unwrap();

        let mut leaver = TestPlayer::connect(&server, "leaver").await;
        let mut stayer = TestPlayer::connect(&server, "stayer").await;
        leaver.join("main").await;
        stayer.join("main").await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;

        let session = server
            .start_session("main", "pcm", 48_000, 2, 16)
            .await
            .unwrap();
        server.send_metadata("main", test_metadata()).await.unwrap();
        server.send_audio("main", 0, vec![1, 1]).await.unwrap();

        for player in [&mut leaver, &mut stayer] {
            let _start = player.recv_msg().await;
            let _meta = player.recv_msg().await;
            let _chunk = player.recv_frame().await;
        }

        leaver.send(ClientMessage::GroupUnjoin(Empty {})).await;
        wait_for_event(&mut events, |e| {
            matches!(e, ServerEvent::ClientRemoved { .. })
        })
        .await;

        // Exactly one session/end with the right id, then silence.
        match leaver.recv_msg().await {
            ServerMessage::SessionEnd(end) => assert_eq!(end.session_id, session.session_id),
            other => panic!("expected session/end, got {other:?}"),
        }

        // The other client continues uninterrupted.
        server.send_audio("main", 10, vec![2, 2]).await.unwrap();
        match stayer.recv_frame().await {
            RawFrame::Binary(data) => match frame::decode(data, 2).unwrap() {
                BinaryFrame::AudioChunk { samples, .. } => assert_eq!(samples, vec![2, 2]),
                other => panic!("expected audio chunk, got {other:?}"),
            },
            other => panic!("expected binary frame, got {other:?}"),
        }
        leaver.expect_silence(200).await;
    }

    #[tokio::test]
    async fn group_list_reflects_session_state() {
        let (server, mut events) = start_server().await;
        server.add_group("idle-group").await.unwrap();
        server.add_group("busy-group").await.unwrap();
        server
            .start_session("busy-group", "pcm", 48_000, 2, 16)
            .await
            .unwrap();

        let mut player = TestPlayer::connect(&server, "asker").await;
        wait_for_event(&mut events, |e| {
            matches!(e, ServerEvent::ClientConnected { .. })
        })
        .await;

        player.send(ClientMessage::GroupGetList(Empty {})).await;
        match player.recv_msg().await {
            ServerMessage::GroupList(list) => {
                assert_eq!(list.groups.len(), 2);
                assert_eq!(list.groups[0].group_id, "busy-group");
                assert_eq!(list.groups[0].state, GroupState::Playing);
                assert_eq!(list.groups[1].group_id, "idle-group");
                assert_eq!(list.groups[1].state, GroupState::Idle);
            }
            other => panic!("expected group/list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn double_session_start_fails() {
        let (server, _events) = start_server().await;
        server.add_group("main").await.unwrap();

        server
            .start_session("main", "pcm", 48_000, 2, 16)
            .await
            .unwrap();
        let result = server.start_session("main", "pcm", 48_000, 2, 16).await;
        assert!(matches!(result, Err(Error::SessionActive)));

        server.end_session("main").await.unwrap();
        server
            .start_session("main", "pcm", 48_000, 2, 16)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_unknown_group_is_ignored() {
        let (server, mut events) = start_server().await;
        server.add_group("real").await.unwrap();

        let mut player = TestPlayer::connect(&server, "wanderer").await;
        player.join("no-such-group").await;
        player.join("real").await;

        // Only the second join lands.
        let event = wait_for_event(&mut events, |e| {
            matches!(e, ServerEvent::ClientAdded { .. })
        })
        .await;
        match event {
            ServerEvent::ClientAdded { group_id, .. } => assert_eq!(group_id, "real"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn switching_groups_leaves_the_first() {
        let (server, mut events) = start_server().await;
        server.add_group("a").await.unwrap();
        server.add_group("b").await.unwrap();

        let mut player = TestPlayer::connect(&server, "mover").await;
        player.join("a").await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;

        player.join("b").await;
        let removed = wait_for_event(&mut events, |e| {
            matches!(e, ServerEvent::ClientRemoved { .. })
        })
        .await;
        match removed {
            ServerEvent::ClientRemoved { group_id, .. } => assert_eq!(group_id, "a"),
            _ => unreachable!(),
        }
        let added = wait_for_event(&mut events, |e| {
            matches!(e, ServerEvent::ClientAdded { .. })
        })
        .await;
        match added {
            ServerEvent::ClientAdded { group_id, .. } => assert_eq!(group_id, "b"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn stream_commands_from_active_clients_reach_the_application() {
        let (server, mut events) = start_server().await;
        server.add_group("main").await.unwrap();

        let mut player = TestPlayer::connect(&server, "commander").await;
        player.join("main").await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;

        server
            .start_session("main", "pcm", 48_000, 2, 16)
            .await
            .unwrap();
        server.send_audio("main", 0, vec![0, 0]).await.unwrap();
        let _start = player.recv_msg().await;
        let _chunk = player.recv_frame().await;

        player
            .send(ClientMessage::StreamCommand(StreamCommand::Pause))
            .await;

        let event = wait_for_event(&mut events, |e| {
            matches!(e, ServerEvent::StreamCommand { .. })
        })
        .await;
        match event {
            ServerEvent::StreamCommand {
                group_id, command, ..
            } => {
                assert_eq!(group_id, "main");
                assert_eq!(command, StreamCommand::Pause);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn stop_ends_active_sessions() {
        let (server, mut events) = start_server().await;
        server.add_group("main").await.unwrap();

        let mut player = TestPlayer::connect(&server, "listener").await;
        player.join("main").await;
        wait_for_event(&mut events, |e| matches!(e, ServerEvent::ClientAdded { .. })).await;

        let session = server
            .start_session("main", "pcm", 48_000, 2, 16)
            .await
            .unwrap();
        server.send_audio("main", 0, vec![0, 0]).await.unwrap();
        let _start = player.recv_msg().await;
        let _chunk = player.recv_frame().await;

        server.stop().await.unwrap();

        match player.recv_msg().await {
            ServerMessage::SessionEnd(end) => assert_eq!(end.session_id, session.session_id),
            other => panic!("expected session/end, got {other:?}"),
        }
    }
}
