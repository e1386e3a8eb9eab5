//! Text wire messages.
//!
//! Every text message is a UTF-8 JSON object of the form
//! `{"type": <string>, "payload": <object>}`. Messages are organized by
//! direction:
//!
//! - [`ClientMessage`] - player (receiver) TO server
//! - [`ServerMessage`] - server TO player
//!
//! The binary side of the protocol lives in [`crate::frame`].

use serde::{Deserialize, Serialize};

use crate::types::{
    GroupEntry, Metadata, MetadataUpdate, PlayerInfo, PlayerState, ServerInfo, SessionInfo,
    StreamCommand,
};
use crate::Result;

/// Empty payload for messages that carry no fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Empty {}

/// Payload of `player/time`: the receiver's audio-clock time at
/// transmission, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTime {
    pub player_transmitted: i64,
}

/// Payload of `source/time`: the three stamps the receiver combines
/// with its own arrival stamp. All microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub player_transmitted: i64,
    pub source_received: i64,
    pub source_transmitted: i64,
}

/// Payload of `group/join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupJoin {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

/// Payload of `session/end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Payload of `group/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupList {
    pub groups: Vec<GroupEntry>,
}

/// Messages a player sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Capability announcement; must be the first message.
    #[serde(rename = "player/hello")]
    PlayerHello(PlayerInfo),
    /// Clock-sync request.
    #[serde(rename = "player/time")]
    PlayerTime(PlayerTime),
    /// Playback state report.
    #[serde(rename = "player/state")]
    PlayerState(PlayerState),
    /// Media command toward the source.
    #[serde(rename = "stream/command")]
    StreamCommand(StreamCommand),
    #[serde(rename = "group/join")]
    GroupJoin(GroupJoin),
    #[serde(rename = "group/unjoin")]
    GroupUnjoin(Empty),
    #[serde(rename = "group/get-list")]
    GroupGetList(Empty),
}

/// Messages the server sends to a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Server identity, sent once after `player/hello`.
    #[serde(rename = "source/hello")]
    SourceHello(ServerInfo),
    /// Clock-sync reply.
    #[serde(rename = "source/time")]
    SourceTime(TimeInfo),
    #[serde(rename = "session/start")]
    SessionStart(SessionInfo),
    #[serde(rename = "session/end")]
    SessionEnd(SessionEnd),
    /// Sticky metadata delta (full object on first report).
    #[serde(rename = "metadata/update")]
    MetadataUpdate(MetadataUpdate),
    #[serde(rename = "group/list")]
    GroupList(GroupList),
}

impl ClientMessage {
    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the wire form.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerMessage {
    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the wire form.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Short display form for logging, type string only.
pub(crate) fn client_message_kind(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::PlayerHello(_) => "player/hello",
        ClientMessage::PlayerTime(_) => "player/time",
        ClientMessage::PlayerState(_) => "player/state",
        ClientMessage::StreamCommand(_) => "stream/command",
        ClientMessage::GroupJoin(_) => "group/join",
        ClientMessage::GroupUnjoin(_) => "group/unjoin",
        ClientMessage::GroupGetList(_) => "group/get-list",
    }
}

/// Short display form for logging, type string only.
pub(crate) fn server_message_kind(msg: &ServerMessage) -> &'static str {
    match msg {
        ServerMessage::SourceHello(_) => "source/hello",
        ServerMessage::SourceTime(_) => "source/time",
        ServerMessage::SessionStart(_) => "session/start",
        ServerMessage::SessionEnd(_) => "session/end",
        ServerMessage::MetadataUpdate(_) => "metadata/update",
        ServerMessage::GroupList(_) => "group/list",
    }
}

/// Build the full-metadata message used when bringing a client current.
pub(crate) fn full_metadata(meta: &Metadata) -> ServerMessage {
    ServerMessage::MetadataUpdate(MetadataUpdate::from(meta.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupState, PlaybackState};

    #[test]
    fn player_time_wire_shape() {
        let msg = ClientMessage::PlayerTime(PlayerTime {
            player_transmitted: 1_000_000,
        });
        let json: serde_json::Value =
            serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "player/time");
        assert_eq!(json["payload"]["player_transmitted"], 1_000_000);
    }

    #[test]
    fn group_join_uses_camel_case_group_id() {
        let msg = ClientMessage::GroupJoin(GroupJoin {
            group_id: "kitchen".to_string(),
        });
        let json: serde_json::Value =
            serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "group/join");
        assert_eq!(json["payload"]["groupId"], "kitchen");
    }

    #[test]
    fn session_end_round_trip() {
        let msg = ServerMessage::SessionEnd(SessionEnd {
            session_id: "abc".to_string(),
        });
        let text = msg.to_json().unwrap();
        assert!(text.contains("\"sessionId\":\"abc\""));

        let back = ServerMessage::from_json(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn stream_command_variants() {
        let play = ClientMessage::StreamCommand(StreamCommand::Play);
        let json: serde_json::Value =
            serde_json::from_str(&play.to_json().unwrap()).unwrap();
        assert_eq!(json["payload"]["command"], "play");

        let volume = ClientMessage::StreamCommand(StreamCommand::Volume { volume: 40 });
        let json: serde_json::Value =
            serde_json::from_str(&volume.to_json().unwrap()).unwrap();
        assert_eq!(json["payload"]["command"], "volume");
        assert_eq!(json["payload"]["volume"], 40);
    }

    #[test]
    fn player_state_round_trip() {
        let msg = ClientMessage::PlayerState(PlayerState {
            playback: PlaybackState::Paused,
            volume: 55,
            muted: false,
        });
        let back = ClientMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn group_list_wire_shape() {
        let msg = ServerMessage::GroupList(GroupList {
            groups: vec![GroupEntry {
                group_id: "main".to_string(),
                state: GroupState::Playing,
            }],
        });
        let json: serde_json::Value =
            serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "group/list");
        assert_eq!(json["payload"]["groups"][0]["groupId"], "main");
        assert_eq!(json["payload"]["groups"][0]["state"], "playing");
    }

    #[test]
    fn unknown_type_is_bad_json() {
        let result = ClientMessage::from_json(r#"{"type":"player/quit","payload":{}}"#);
        assert!(matches!(result, Err(crate::Error::BadJson(_))));
    }

    #[test]
    fn metadata_delta_omits_absent_fields() {
        let msg = ServerMessage::MetadataUpdate(MetadataUpdate {
            title: Some("B".to_string()),
            ..Default::default()
        });
        let json: serde_json::Value =
            serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["payload"]["title"], "B");
        assert!(json["payload"].get("artist").is_none());
        assert!(json["payload"].get("shuffle").is_none());
    }
}
