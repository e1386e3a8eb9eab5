//! Group membership and session ownership.
//!
//! A [`Group`] is a named set of clients sharing at most one active
//! [`Session`]. Groups own their sessions and reference clients by id;
//! the session reaches clients through the group's member map, which
//! keeps the group / session / client relationship acyclic.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::client::Client;
use crate::server::ServerEvent;
use crate::session::Session;
use crate::timesync::ServerClock;
use crate::types::{ArtFormat, ClientId, GroupState, Metadata, SessionInfo};
use crate::{Error, Result};

pub(crate) struct Group {
    id: String,
    clients: HashMap<ClientId, Client>,
    session: Option<Session>,
    clock: ServerClock,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Group {
    pub(crate) fn new(
        id: String,
        clock: ServerClock,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            clients: HashMap::new(),
            session: None,
            clock,
            events,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn state(&self) -> GroupState {
        if self.session.is_some() {
            GroupState::Playing
        } else {
            GroupState::Idle
        }
    }

    pub(crate) fn contains(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Add a client to the group. A running session does not greet it
    /// here; activation happens on the next send that concerns it.
    pub(crate) fn add_client(&mut self, client: Client) {
        let client_id = client.id();
        info!(group_id = %self.id, client_id = %client_id, "Client added to group");
        self.clients.insert(client_id, client);
        let _ = self.events.send(ServerEvent::ClientAdded {
            group_id: self.id.clone(),
            client_id,
        });
    }

    /// Remove a client. If it is active in the running session it gets
    /// a final `session/end` through the engine's removal path.
    pub(crate) fn remove_client(&mut self, client_id: ClientId) {
        if let Some(session) = &mut self.session {
            session.remove_client(client_id);
        }
        if self.clients.remove(&client_id).is_some() {
            info!(group_id = %self.id, client_id = %client_id, "Client removed from group");
            let _ = self.events.send(ServerEvent::ClientRemoved {
                group_id: self.id.clone(),
                client_id,
            });
        }
    }

    /// Start a session with the given parameters. Fails while one is
    /// already active.
    pub(crate) fn start_session(
        &mut self,
        codec: impl Into<String>,
        sample_rate: u32,
        channels: u8,
        bit_depth: u8,
    ) -> Result<SessionInfo> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }
        let info = SessionInfo {
            session_id: Uuid::new_v4().to_string(),
            codec: codec.into(),
            sample_rate,
            channels,
            bit_depth,
            now: self.clock.now_us(),
            codec_header: None,
        };
        self.session = Some(Session::new(
            self.id.clone(),
            info.clone(),
            self.events.clone(),
        ));
        Ok(info)
    }

    /// End the running session, if any.
    pub(crate) fn end_session(&mut self) -> Result<()> {
        let mut session = self.session.take().ok_or(Error::NoSessionActive)?;
        session.end();
        Ok(())
    }

    pub(crate) fn send_audio(&mut self, timestamp_us: i64, samples: &[i16]) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoSessionActive)?;
        session.send_audio(&self.clients, timestamp_us, samples)
    }

    pub(crate) fn send_audio_planes(
        &mut self,
        timestamp_us: i64,
        planes: &[Vec<f32>],
    ) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoSessionActive)?;
        session.send_audio_planes(&self.clients, timestamp_us, planes)
    }

    pub(crate) fn send_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoSessionActive)?;
        session.send_metadata(&self.clients, metadata);
        Ok(())
    }

    pub(crate) fn send_art(&mut self, format: ArtFormat, data: &Bytes) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoSessionActive)?;
        session.send_art(&self.clients, format, data);
        Ok(())
    }
}
