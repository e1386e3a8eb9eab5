//! Server-side client proxy.
//!
//! A [`Client`] represents one connected receiver from the server's
//! viewpoint: a stable id, the latest [`PlayerInfo`] once the hello
//! arrived, a bounded outgoing queue, and an event stream the server
//! reactor and session engines subscribe to.
//!
//! The proxy runs two tasks per connection: a writer draining the
//! outgoing queue and a reader parsing incoming frames. `player/time`
//! is answered directly from the read loop so the reply carries the
//! receive and transmit stamps of the same invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::msg::{client_message_kind, server_message_kind, ClientMessage, ServerMessage, TimeInfo};
use crate::timesync::ServerClock;
use crate::transport::{CloseKind, Connection, ConnectionWriter, RawFrame};
use crate::types::{ClientId, PlayerInfo, PlayerState, ServerInfo, StreamCommand};
use crate::{Error, Result};

/// Bound of the per-client outgoing queue. A client that falls this
/// far behind is closed with a policy-violation code and evicted.
pub(crate) const SEND_QUEUE_CAPACITY: usize = 256;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Group membership request carried by a `group/*` message.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupCommand {
    Join { group_id: String },
    Unjoin,
    List,
}

/// Why a client's transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The peer closed or the socket failed.
    Transport,
    /// The send queue overflowed its bound.
    Backlog,
    /// The peer broke the protocol.
    Protocol,
}

/// Events a connected client emits toward its subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Receiver-reported playback state.
    PlayerState(PlayerState),
    /// Media command from the receiver toward the source.
    StreamCommand(StreamCommand),
    /// Group membership request; handled by the server reactor.
    GroupCommand(GroupCommand),
    /// The transport is gone.
    Closed { cause: CloseCause },
}

enum Outgoing {
    Text(String),
    Binary(Bytes),
    /// Ordered close: sent after everything queued before it.
    Close(CloseKind),
}

struct Shared {
    id: ClientId,
    out_tx: mpsc::Sender<Outgoing>,
    close_tx: mpsc::Sender<CloseKind>,
    connected: AtomicBool,
    close_emitted: AtomicBool,
    info: RwLock<Option<PlayerInfo>>,
    events: broadcast::Sender<ClientEvent>,
    reactor_tx: mpsc::UnboundedSender<(ClientId, ClientEvent)>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event.clone());
        let _ = self.reactor_tx.send((self.id, event));
    }

    /// Emit the close event exactly once, whatever races to it.
    fn emit_closed(&self, cause: CloseCause) {
        self.connected.store(false, Ordering::SeqCst);
        if self.close_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(ClientEvent::Closed { cause });
    }
}

/// Handle to one connected receiver. Cheap to clone; all clones refer
/// to the same connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Run the accept sequence on a fresh connection: allocate an id,
    /// require `player/hello`, reply `source/hello`, then start the
    /// background read loop.
    pub(crate) async fn accept<S>(
        conn: Connection<S>,
        server_info: ServerInfo,
        clock: ServerClock,
        reactor_tx: mpsc::UnboundedSender<(ClientId, ClientEvent)>,
    ) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ClientId::new();
        let (reader, writer) = conn.split();
        let (out_tx, out_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            id,
            out_tx,
            close_tx,
            connected: AtomicBool::new(true),
            close_emitted: AtomicBool::new(false),
            info: RwLock::new(None),
            events,
            reactor_tx,
        });

        tokio::spawn(write_loop(writer, out_rx, close_rx, Arc::clone(&shared)));

        let mut stream = Box::pin(reader.into_stream());
        let hello = wait_for_hello(&mut stream, &shared).await?;

        info!(client_id = %id, player = %hello.name, "Client hello received");
        *shared.info.write().unwrap() = Some(hello);

        let client = Client { shared };
        client.send(&ServerMessage::SourceHello(server_info))?;

        let shared = Arc::clone(&client.shared);
        tokio::spawn(read_loop(stream, shared, clock));

        Ok(client)
    }

    /// Stable id of this connection.
    pub fn id(&self) -> ClientId {
        self.shared.id
    }

    /// The capabilities announced in `player/hello`.
    pub fn player_info(&self) -> Option<PlayerInfo> {
        self.shared.info.read().unwrap().clone()
    }

    /// Transport open and `player/hello` received.
    pub fn is_ready(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
            && self.shared.info.read().unwrap().is_some()
    }

    /// Subscribe to this client's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Enqueue a text message. Fails with [`Error::ClientNotConnected`]
    /// once the transport is gone.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let json = msg.to_json()?;
        debug!(client_id = %self.shared.id, "TX: {}", server_message_kind(msg));
        self.enqueue(Outgoing::Text(json))
    }

    /// Enqueue a binary frame; same contract as [`Client::send`].
    pub fn send_binary(&self, data: Bytes) -> Result<()> {
        self.enqueue(Outgoing::Binary(data))
    }

    /// Initiate a graceful close from the server side. Frames already
    /// queued still go out first.
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        if self
            .shared
            .out_tx
            .try_send(Outgoing::Close(CloseKind::Normal))
            .is_err()
        {
            let _ = self.shared.close_tx.try_send(CloseKind::Normal);
        }
    }

    fn enqueue(&self, out: Outgoing) -> Result<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(Error::ClientNotConnected);
        }
        match self.shared.out_tx.try_send(out) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %self.shared.id, "Send queue full, evicting client");
                let _ = self.shared.close_tx.try_send(CloseKind::Policy);
                self.shared.emit_closed(CloseCause::Backlog);
                Err(Error::Backlog)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.connected.store(false, Ordering::SeqCst);
                Err(Error::ClientNotConnected)
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.shared.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Read until the mandatory `player/hello`. Anything else that
/// arrives first is an error and is dropped.
async fn wait_for_hello<St>(stream: &mut St, shared: &Arc<Shared>) -> Result<PlayerInfo>
where
    St: Stream<Item = Result<RawFrame>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(RawFrame::Text(text))) => match ClientMessage::from_json(&text) {
                Ok(ClientMessage::PlayerHello(info)) => return Ok(info),
                Ok(other) => {
                    warn!(
                        client_id = %shared.id,
                        kind = client_message_kind(&other),
                        "{}",
                        Error::MessageBeforeHello
                    );
                }
                Err(e) => {
                    warn!(client_id = %shared.id, error = %e, "Malformed message before hello, closing");
                    let _ = shared.close_tx.try_send(CloseKind::Protocol);
                    return Err(e);
                }
            },
            Some(Ok(RawFrame::Binary(data))) => {
                warn!(client_id = %shared.id, len = data.len(), "RX: binary frame from client, dropping");
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::ConnectionClosed),
        }
    }
}

async fn read_loop<St>(mut stream: St, shared: Arc<Shared>, clock: ServerClock)
where
    St: Stream<Item = Result<RawFrame>> + Unpin,
{
    while let Some(item) = stream.next().await {
        match item {
            Ok(RawFrame::Text(text)) => {
                // Stamped before parsing so queueing delays inside the
                // process do not skew `source_received`.
                let received_us = clock.now_us();
                match ClientMessage::from_json(&text) {
                    Ok(msg) => handle_message(&shared, clock, received_us, msg),
                    Err(e) => {
                        warn!(client_id = %shared.id, error = %e, "Protocol error, closing client");
                        let _ = shared.close_tx.try_send(CloseKind::Protocol);
                        shared.emit_closed(CloseCause::Protocol);
                        return;
                    }
                }
            }
            Ok(RawFrame::Binary(data)) => {
                // Binary is strictly server -> player.
                warn!(client_id = %shared.id, len = data.len(), "RX: binary frame from client, dropping");
            }
            Err(e) => {
                debug!(client_id = %shared.id, error = %e, "Read failed");
                break;
            }
        }
    }
    let _ = shared.close_tx.try_send(CloseKind::Normal);
    shared.emit_closed(CloseCause::Transport);
}

fn handle_message(shared: &Arc<Shared>, clock: ServerClock, received_us: i64, msg: ClientMessage) {
    debug!(client_id = %shared.id, "RX: {}", client_message_kind(&msg));
    match msg {
        ClientMessage::PlayerHello(_) => {
            warn!(client_id = %shared.id, "Duplicate player/hello, ignoring");
        }
        ClientMessage::PlayerTime(t) => {
            let reply = ServerMessage::SourceTime(TimeInfo {
                player_transmitted: t.player_transmitted,
                source_received: received_us,
                source_transmitted: clock.now_us(),
            });
            if let Ok(json) = reply.to_json() {
                if shared.out_tx.try_send(Outgoing::Text(json)).is_err() {
                    debug!(client_id = %shared.id, "Dropping source/time reply, queue unavailable");
                }
            }
        }
        ClientMessage::PlayerState(state) => shared.emit(ClientEvent::PlayerState(state)),
        ClientMessage::StreamCommand(command) => shared.emit(ClientEvent::StreamCommand(command)),
        ClientMessage::GroupJoin(join) => shared.emit(ClientEvent::GroupCommand(GroupCommand::Join {
            group_id: join.group_id,
        })),
        ClientMessage::GroupUnjoin(_) => shared.emit(ClientEvent::GroupCommand(GroupCommand::Unjoin)),
        ClientMessage::GroupGetList(_) => shared.emit(ClientEvent::GroupCommand(GroupCommand::List)),
    }
}

async fn write_loop<S>(
    mut writer: ConnectionWriter<S>,
    mut out_rx: mpsc::Receiver<Outgoing>,
    mut close_rx: mpsc::Receiver<CloseKind>,
    shared: Arc<Shared>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            kind = close_rx.recv() => {
                writer.close(kind.unwrap_or(CloseKind::Normal)).await;
                break;
            }
            out = out_rx.recv() => {
                let result = match out {
                    Some(Outgoing::Text(text)) => writer.send_text(text).await,
                    Some(Outgoing::Binary(data)) => writer.send_binary(data).await,
                    Some(Outgoing::Close(kind)) => {
                        writer.close(kind).await;
                        break;
                    }
                    None => {
                        writer.close(CloseKind::Normal).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!(client_id = %shared.id, error = %e, "Write failed");
                    shared.emit_closed(CloseCause::Transport);
                    break;
                }
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
}
