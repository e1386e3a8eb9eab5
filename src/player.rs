//! Receiver client.
//!
//! A [`Player`] maintains one transport to a server, decodes messages,
//! schedules audio against the local [`AudioOutput`] clock and exposes
//! a state-change event stream. The connection moves through
//! disconnected -> connecting -> connected (no session) -> session
//! active; invalid messages for the current state are logged and
//! discarded, never fatal.
//!
//! Clock synchronization runs for the lifetime of the connection: an
//! exchange burst every [`BURST_DELAY`](crate::timesync::BURST_DELAY)
//! until the offset window holds
//! [`MIN_SAMPLES`](crate::timesync::MIN_SAMPLES) samples, then one
//! exchange per second. The window survives session end; only a
//! reconnect (a new `Player`) starts it over.
//!
//! # Example
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
//!         match event {
//!             PlayerEvent::MetadataUpdate(Some(meta)) => {
//!                 println!("Now playing: {:?}", meta.title);
//!             }
//!             PlayerEvent::Close { .. } => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::frame::{self, BinaryFrame};
use crate::msg::{
    client_message_kind, server_message_kind, ClientMessage, Empty, GroupJoin, PlayerTime,
    ServerMessage,
};
use crate::output::AudioOutput;
use crate::pcm;
use crate::timesync::{OffsetFilter, BURST_DELAY, SYNC_INTERVAL};
use crate::transport::{CloseKind, Connection, RawFrame};
use crate::types::{
    GroupEntry, MediaArt, Metadata, PlayerInfo, PlayerState, ServerInfo, SessionInfo,
    StreamCommand,
};
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// State-change events a player emits.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The transport opened and `player/hello` went out.
    Open,
    /// `source/hello` arrived.
    ServerUpdate(ServerInfo),
    /// A session started (`Some`) or ended (`None`).
    SessionUpdate(Option<SessionInfo>),
    /// The cached metadata changed; `None` when the session ended.
    MetadataUpdate(Option<Metadata>),
    /// Media art arrived; `None` when the session ended.
    ArtUpdate(Option<MediaArt>),
    /// Reply to a `group/get-list` request.
    GroupList(Vec<GroupEntry>),
    /// The connection is gone. `expected` distinguishes a local
    /// [`PlayerHandle::close`] from a transport-initiated closure.
    Close { expected: bool },
}

enum PlayerCommand {
    JoinGroup {
        group_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    UnjoinGroup {
        reply: oneshot::Sender<Result<()>>,
    },
    RequestGroupList {
        reply: oneshot::Sender<Result<()>>,
    },
    ReportState {
        state: PlayerState,
        reply: oneshot::Sender<Result<()>>,
    },
    SendCommand {
        command: StreamCommand,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// The receiver entry points.
pub struct Player;

impl Player {
    /// Connect to a server at a `ws://` / `wss://` endpoint and spawn
    /// the player runner.
    pub async fn connect(
        endpoint: &str,
        config: PlayerConfig,
        output: impl AudioOutput,
    ) -> Result<(PlayerHandle, mpsc::Receiver<PlayerEvent>)> {
        let conn = Connection::connect(endpoint).await?;
        Ok(Self::spawn(conn, config, output))
    }

    /// Run a player over an already-established stream (tests drive
    /// in-memory pipes through this).
    pub async fn attach<S>(
        stream: S,
        config: PlayerConfig,
        output: impl AudioOutput,
    ) -> Result<(PlayerHandle, mpsc::Receiver<PlayerEvent>)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let conn = Connection::client(stream).await?;
        Ok(Self::spawn(conn, config, output))
    }

    fn spawn<S>(
        conn: Connection<S>,
        config: PlayerConfig,
        output: impl AudioOutput,
    ) -> (PlayerHandle, mpsc::Receiver<PlayerEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(16);

        let runner = PlayerRunner {
            conn,
            output: Box::new(output),
            filter: OffsetFilter::new(),
            server: None,
            session: None,
            metadata: None,
            event_tx,
            command_rx,
            next_sync: Instant::now(),
        };
        let info = config.player_info();
        let task = tokio::spawn(async move { runner.run(info).await });

        (PlayerHandle { command_tx, task }, event_rx)
    }
}

/// Handle to a running player. Dropping it without
/// [`PlayerHandle::close`] leaves the runner alive until the transport
/// goes away.
pub struct PlayerHandle {
    command_tx: mpsc::Sender<PlayerCommand>,
    task: JoinHandle<()>,
}

impl PlayerHandle {
    /// Ask the server to put this player into a group.
    pub async fn join_group(&self, group_id: impl Into<String>) -> Result<()> {
        self.command(|reply| PlayerCommand::JoinGroup {
            group_id: group_id.into(),
            reply,
        })
        .await
    }

    /// Leave the current group, ending this player's participation in
    /// any running session.
    pub async fn unjoin_group(&self) -> Result<()> {
        self.command(|reply| PlayerCommand::UnjoinGroup { reply })
            .await
    }

    /// Request the group list; the reply arrives as
    /// [`PlayerEvent::GroupList`].
    pub async fn request_group_list(&self) -> Result<()> {
        self.command(|reply| PlayerCommand::RequestGroupList { reply })
            .await
    }

    /// Report local playback state to the server.
    pub async fn report_state(&self, state: PlayerState) -> Result<()> {
        self.command(|reply| PlayerCommand::ReportState { state, reply })
            .await
    }

    /// Send a media command toward the source.
    pub async fn send_command(&self, command: StreamCommand) -> Result<()> {
        self.command(|reply| PlayerCommand::SendCommand { command, reply })
            .await
    }

    /// Close the connection. The event stream ends with
    /// `Close { expected: true }`.
    pub async fn close(self) {
        let _ = self.command_tx.send(PlayerCommand::Close).await;
        let _ = self.task.await;
    }

    async fn command(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> PlayerCommand,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}

// ============================================================================
// Player Runner (runs in a spawned task)
// ============================================================================

struct PlayerRunner<S> {
    conn: Connection<S>,
    output: Box<dyn AudioOutput>,
    filter: OffsetFilter,
    /// Cached server identity from `source/hello`.
    #[allow(dead_code)] // Kept for debugging
    server: Option<ServerInfo>,
    session: Option<SessionInfo>,
    metadata: Option<Metadata>,
    event_tx: mpsc::Sender<PlayerEvent>,
    command_rx: mpsc::Receiver<PlayerCommand>,
    /// Deadline of the next clock-sync exchange.
    next_sync: Instant,
}

impl<S> PlayerRunner<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self, info: PlayerInfo) {
        info!(player = %info.name, "Player runner starting");

        if let Err(e) = self.send_msg(ClientMessage::PlayerHello(info)).await {
            warn!(error = %e, "Hello failed");
            self.handle_close(false).await;
            return;
        }
        self.emit(PlayerEvent::Open).await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(self.next_sync) => {
                    self.send_time_request().await;
                }
                frame = self.conn.recv() => match frame {
                    Ok(Some(RawFrame::Text(text))) => self.handle_text(&text).await,
                    Ok(Some(RawFrame::Binary(data))) => self.handle_binary(data).await,
                    Ok(None) => {
                        info!("Server closed the connection");
                        self.handle_close(false).await;
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "Transport error");
                        self.handle_close(false).await;
                        return;
                    }
                },
                cmd = self.command_rx.recv() => match cmd {
                    Some(PlayerCommand::Close) | None => {
                        let _ = self.conn.close(CloseKind::Normal).await;
                        self.handle_close(true).await;
                        return;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },
            }
        }
    }

    async fn handle_command(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::JoinGroup { group_id, reply } => {
                let result = self
                    .send_msg(ClientMessage::GroupJoin(GroupJoin { group_id }))
                    .await;
                let _ = reply.send(result);
            }
            PlayerCommand::UnjoinGroup { reply } => {
                let result = self.send_msg(ClientMessage::GroupUnjoin(Empty {})).await;
                let _ = reply.send(result);
            }
            PlayerCommand::RequestGroupList { reply } => {
                let result = self.send_msg(ClientMessage::GroupGetList(Empty {})).await;
                let _ = reply.send(result);
            }
            PlayerCommand::ReportState { state, reply } => {
                let result = self.send_msg(ClientMessage::PlayerState(state)).await;
                let _ = reply.send(result);
            }
            PlayerCommand::SendCommand { command, reply } => {
                let result = self.send_msg(ClientMessage::StreamCommand(command)).await;
                let _ = reply.send(result);
            }
            // Close never reaches here; run() intercepts it.
            PlayerCommand::Close => {}
        }
    }

    async fn send_msg(&mut self, msg: ClientMessage) -> Result<()> {
        debug!("TX: {}", client_message_kind(&msg));
        self.conn.send_text(msg.to_json()?).await
    }

    /// Fire one clock-sync exchange and arm the steady-state timer.
    /// The reply handler rearms sooner while the window is thin.
    async fn send_time_request(&mut self) {
        let player_transmitted = audio_clock_us(self.output.now());
        let msg = ClientMessage::PlayerTime(PlayerTime { player_transmitted });
        if let Err(e) = self.send_msg(msg).await {
            debug!(error = %e, "player/time send failed");
        }
        self.next_sync = Instant::now() + SYNC_INTERVAL;
    }

    async fn handle_text(&mut self, text: &str) {
        let msg = match ServerMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "RX: dropping malformed message");
                return;
            }
        };
        debug!("RX: {}", server_message_kind(&msg));

        match msg {
            ServerMessage::SourceHello(server) => {
                self.server = Some(server.clone());
                self.emit(PlayerEvent::ServerUpdate(server)).await;
            }
            ServerMessage::SourceTime(reply) => {
                let player_received = audio_clock_us(self.output.now());
                let sample = self.filter.add_exchange(&reply, player_received);
                debug!(
                    sample,
                    offset = self.filter.offset().unwrap_or_default(),
                    window = self.filter.len(),
                    "Clock sample"
                );
                if self.filter.needs_burst() {
                    self.next_sync = Instant::now() + BURST_DELAY;
                }
            }
            ServerMessage::SessionStart(session) => {
                if self.session.is_some() {
                    warn!(
                        session_id = %session.session_id,
                        "RX: session/start while a session is active, dropping"
                    );
                    return;
                }
                info!(
                    session_id = %session.session_id,
                    sample_rate = session.sample_rate,
                    channels = session.channels,
                    "Session started"
                );
                self.output.begin(&session);
                self.session = Some(session.clone());
                self.emit(PlayerEvent::SessionUpdate(Some(session))).await;
            }
            ServerMessage::SessionEnd(end) => {
                let Some(session) = self.session.take() else {
                    warn!("RX: session/end without active session, dropping");
                    return;
                };
                if session.session_id != end.session_id {
                    warn!(
                        active = %session.session_id,
                        ended = %end.session_id,
                        "session/end id mismatch"
                    );
                }
                info!(session_id = %end.session_id, "Session ended");
                self.output.end();
                self.metadata = None;
                self.emit(PlayerEvent::SessionUpdate(None)).await;
                self.emit(PlayerEvent::MetadataUpdate(None)).await;
                self.emit(PlayerEvent::ArtUpdate(None)).await;
            }
            ServerMessage::MetadataUpdate(delta) => {
                if self.session.is_none() {
                    warn!("RX: metadata/update without active session, dropping");
                    return;
                }
                // An empty cache means this delta is the full object.
                let mut merged = self.metadata.take().unwrap_or_default();
                merged.apply(&delta);
                self.metadata = Some(merged.clone());
                self.emit(PlayerEvent::MetadataUpdate(Some(merged))).await;
            }
            ServerMessage::GroupList(list) => {
                self.emit(PlayerEvent::GroupList(list.groups)).await;
            }
        }
    }

    async fn handle_binary(&mut self, data: Bytes) {
        match data.first().copied() {
            Some(frame::AUDIO_CHUNK) => self.handle_audio_chunk(data),
            _ => match frame::decode(data, 0) {
                Ok(BinaryFrame::MediaArt { format, data }) => {
                    debug!(?format, len = data.len(), "RX: media art");
                    self.emit(PlayerEvent::ArtUpdate(Some(MediaArt { format, data })))
                        .await;
                }
                // Audio frames never reach this arm; the discriminator
                // was matched above.
                Ok(BinaryFrame::AudioChunk { .. }) => {}
                Err(e) => warn!(error = %e, "RX: dropping binary frame"),
            },
        }
    }

    /// Decode, convert and schedule one audio chunk against the
    /// synchronized clock.
    fn handle_audio_chunk(&mut self, data: Bytes) {
        let Some(session) = &self.session else {
            warn!("RX: audio chunk without active session, dropping");
            return;
        };

        let (timestamp_us, samples) = match frame::decode(data, session.channels) {
            Ok(BinaryFrame::AudioChunk {
                timestamp_us,
                samples,
            }) => (timestamp_us, samples),
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "RX: dropping audio chunk");
                return;
            }
        };

        let planes = match pcm::deinterleave(&samples, session.channels) {
            Ok(planes) => planes,
            Err(e) => {
                warn!(error = %e, "RX: dropping audio chunk");
                return;
            }
        };

        let offset = self.filter.offset().unwrap_or(0.0);
        let start_local = timestamp_us as f64 / 1_000_000.0 - offset;
        let now = self.output.now();
        if start_local < now {
            warn!(
                late_s = now - start_local,
                "Late audio chunk, playing immediately"
            );
            self.output.schedule(now, planes);
        } else {
            self.output.schedule(start_local, planes);
        }
    }

    /// Tear down local session state and emit the close event.
    async fn handle_close(&mut self, expected: bool) {
        if self.session.take().is_some() {
            self.output.end();
        }
        self.metadata = None;
        self.emit(PlayerEvent::Close { expected }).await;
    }

    async fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// Audio-clock seconds to protocol microseconds.
fn audio_clock_us(seconds: f64) -> i64 {
    (seconds * 1_000_000.0) as i64
}
