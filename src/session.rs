//! Session engine.
//!
//! One [`Session`] exists per active audio session, owned by its
//! group. It fans out audio and sticky state to the group's ready
//! clients, activating each client lazily on the first send that
//! concerns it: `session/start`, then the cached metadata and art, then
//! the triggering payload. Activation also binds the client's
//! `stream-command` and `player-state` events to the server event
//! stream; the binding is a guard object torn down when the client
//! leaves the active set.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientEvent};
use crate::frame;
use crate::msg::{full_metadata, ServerMessage, SessionEnd};
use crate::pcm;
use crate::server::ServerEvent;
use crate::types::{ArtFormat, ClientId, Metadata, MetadataUpdate, SessionInfo};
use crate::{Error, Result};

/// Scoped subscription from a client's event stream into the server
/// event stream. Dropping it tears the forwarder down.
struct EventBinding {
    task: JoinHandle<()>,
}

impl Drop for EventBinding {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ActiveClient {
    client: Client,
    _binding: EventBinding,
}

/// State of one active audio session.
pub(crate) struct Session {
    group_id: String,
    info: SessionInfo,
    active: HashMap<ClientId, ActiveClient>,
    last_metadata: Option<Metadata>,
    /// The full encoded art frame, replayed verbatim on activation.
    last_art: Option<Bytes>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Session {
    pub(crate) fn new(
        group_id: String,
        info: SessionInfo,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        info!(
            group_id = %group_id,
            session_id = %info.session_id,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "Session created"
        );
        Self {
            group_id,
            info,
            active: HashMap::new(),
            last_metadata: None,
            last_art: None,
            events,
        }
    }

    /// Encode one audio chunk and fan it out. `samples` are
    /// interleaved int16 across the session's channels; `timestamp_us`
    /// is the server-clock instant at which sample 0 plays.
    pub(crate) fn send_audio(
        &mut self,
        members: &HashMap<ClientId, Client>,
        timestamp_us: i64,
        samples: &[i16],
    ) -> Result<()> {
        let chunk = frame::encode_audio_chunk(timestamp_us, samples, self.info.channels)?;
        self.fan_out_binary(members, chunk);
        Ok(())
    }

    /// Like [`Session::send_audio`] but from per-channel float planes.
    pub(crate) fn send_audio_planes(
        &mut self,
        members: &HashMap<ClientId, Client>,
        timestamp_us: i64,
        planes: &[Vec<f32>],
    ) -> Result<()> {
        if planes.len() != self.info.channels as usize {
            return Err(Error::ChannelMismatch {
                samples: planes.iter().map(Vec::len).sum(),
                channels: planes.len(),
            });
        }
        let samples = pcm::interleave(planes)?;
        self.send_audio(members, timestamp_us, &samples)
    }

    /// Report new metadata. Only changed fields go on the wire; an
    /// unchanged report is suppressed entirely.
    pub(crate) fn send_metadata(&mut self, members: &HashMap<ClientId, Client>, next: &Metadata) {
        let (delta, merged) = match &self.last_metadata {
            None => (MetadataUpdate::from(next.clone()), next.clone()),
            Some(current) => {
                let delta = current.diff(next);
                if delta.is_empty() {
                    debug!(
                        session_id = %self.info.session_id,
                        "Metadata unchanged, suppressing update"
                    );
                    return;
                }
                let mut merged = current.clone();
                merged.apply(&delta);
                (delta, merged)
            }
        };

        let msg = ServerMessage::MetadataUpdate(delta);
        for client in self.ready_targets(members) {
            if let Err(e) = client.send(&msg) {
                warn!(client_id = %client.id(), error = %e, "Metadata send failed");
            }
        }
        self.last_metadata = Some(merged);
    }

    /// Send a media art image and remember the encoded frame so future
    /// activations replay it.
    pub(crate) fn send_art(
        &mut self,
        members: &HashMap<ClientId, Client>,
        format: ArtFormat,
        data: &[u8],
    ) {
        let art = frame::encode_media_art(format, data);
        self.fan_out_binary(members, art.clone());
        self.last_art = Some(art);
    }

    /// End the session: every still-ready active client gets one
    /// `session/end`, sent directly so teardown cannot re-activate
    /// anyone. Clears the active set and the sticky caches.
    pub(crate) fn end(&mut self) {
        info!(
            group_id = %self.group_id,
            session_id = %self.info.session_id,
            active = self.active.len(),
            "Ending session"
        );
        let end = ServerMessage::SessionEnd(SessionEnd {
            session_id: self.info.session_id.clone(),
        });
        for (id, entry) in self.active.drain() {
            if entry.client.is_ready() {
                if let Err(e) = entry.client.send(&end) {
                    debug!(client_id = %id, error = %e, "session/end send failed");
                }
            }
        }
        self.last_metadata = None;
        self.last_art = None;
        let _ = self.events.send(ServerEvent::SessionEnded {
            group_id: self.group_id.clone(),
            session_id: self.info.session_id.clone(),
        });
    }

    /// The owning group evicted a client mid-session: close its view
    /// of the session and tear down its event binding.
    pub(crate) fn remove_client(&mut self, client_id: ClientId) {
        let Some(entry) = self.active.remove(&client_id) else {
            return;
        };
        if entry.client.is_ready() {
            let end = ServerMessage::SessionEnd(SessionEnd {
                session_id: self.info.session_id.clone(),
            });
            if let Err(e) = entry.client.send(&end) {
                debug!(client_id = %client_id, error = %e, "session/end send failed");
            }
        }
        debug!(
            client_id = %client_id,
            session_id = %self.info.session_id,
            "Client removed from session"
        );
        // entry drops here, releasing the event binding.
    }

    fn fan_out_binary(&mut self, members: &HashMap<ClientId, Client>, data: Bytes) {
        for client in self.ready_targets(members) {
            if let Err(e) = client.send_binary(data.clone()) {
                warn!(client_id = %client.id(), error = %e, "Binary send failed");
            }
        }
    }

    /// Collect the clients this send should reach, activating ready
    /// newcomers and demoting actives whose transport went away.
    fn ready_targets(&mut self, members: &HashMap<ClientId, Client>) -> Vec<Client> {
        let stale: Vec<ClientId> = self
            .active
            .iter()
            .filter(|(_, entry)| !entry.client.is_ready())
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            debug!(client_id = %id, "Demoting client no longer ready");
            self.active.remove(&id);
        }

        let mut targets = Vec::with_capacity(members.len());
        for (id, client) in members {
            if !client.is_ready() {
                continue;
            }
            if !self.active.contains_key(id) && !self.activate(*id, client) {
                continue;
            }
            targets.push(client.clone());
        }
        targets
    }

    /// Bring one ready client current: `session/start`, the cached
    /// metadata and art if any, then bind its events.
    fn activate(&mut self, id: ClientId, client: &Client) -> bool {
        debug!(
            client_id = %id,
            session_id = %self.info.session_id,
            "Activating client"
        );
        if let Err(e) = client.send(&ServerMessage::SessionStart(self.info.clone())) {
            warn!(client_id = %id, error = %e, "session/start send failed");
            return false;
        }
        if let Some(meta) = &self.last_metadata {
            if let Err(e) = client.send(&full_metadata(meta)) {
                warn!(client_id = %id, error = %e, "Metadata replay failed");
            }
        }
        if let Some(art) = &self.last_art {
            if let Err(e) = client.send_binary(art.clone()) {
                warn!(client_id = %id, error = %e, "Art replay failed");
            }
        }

        let binding = self.bind(id, client);
        self.active.insert(
            id,
            ActiveClient {
                client: client.clone(),
                _binding: binding,
            },
        );
        true
    }

    fn bind(&self, id: ClientId, client: &Client) -> EventBinding {
        let mut rx = client.subscribe();
        let events = self.events.clone();
        let group_id = self.group_id.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ClientEvent::StreamCommand(command)) => {
                        let _ = events.send(ServerEvent::StreamCommand {
                            group_id: group_id.clone(),
                            client_id: id,
                            command,
                        });
                    }
                    Ok(ClientEvent::PlayerState(state)) => {
                        let _ = events.send(ServerEvent::PlayerState {
                            group_id: group_id.clone(),
                            client_id: id,
                            state,
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %id, skipped, "Event binding lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        EventBinding { task }
    }
}
