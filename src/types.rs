//! Core data types for unison.
//!
//! These are the structures that travel inside text messages (see
//! [`crate::msg`]) plus the identifiers and sticky state the server and
//! player keep between messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a server instance. Immutable for the server's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Stable server id.
    pub server_id: String,
    /// Human-readable server name.
    pub name: String,
}

/// Optional display geometry a player advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

/// Capability descriptor a receiver announces in `player/hello`.
/// Immutable per connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Stable player id.
    pub player_id: String,
    /// Human-readable player name.
    pub name: String,
    /// Role of this endpoint ("player" for a plain receiver).
    pub role: String,
    /// Local buffer capacity in bytes.
    pub buffer_capacity: u64,
    #[serde(default)]
    pub supported_codecs: Vec<String>,
    #[serde(default)]
    pub supported_channels: Vec<u8>,
    #[serde(default)]
    pub supported_sample_rates: Vec<u32>,
    #[serde(default)]
    pub supported_bit_depths: Vec<u8>,
    #[serde(default)]
    pub supported_stream_types: Vec<String>,
    #[serde(default)]
    pub supported_picture_formats: Vec<String>,
    /// Display geometry, if the player has a screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplaySize>,
}

/// Parameters of an active audio session. Immutable from creation
/// until session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session id.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Codec tag; "pcm" is the normative value.
    pub codec: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Bit depth of the source samples.
    pub bit_depth: u8,
    /// Server monotonic clock at session creation, in microseconds.
    pub now: i64,
    /// Opaque codec header blob, base64 on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_blob"
    )]
    pub codec_header: Option<Vec<u8>>,
}

/// Repeat mode of the source playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

/// Sticky display state. The server holds the authoritative current
/// value; receivers mirror it from `metadata/update` deltas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub track: Option<u32>,
    /// Ordered list of group member names.
    #[serde(default)]
    pub group_members: Vec<String>,
    /// Media commands the source currently supports.
    #[serde(default)]
    pub support_commands: Vec<String>,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub shuffle: bool,
}

/// Delta form of [`Metadata`]: only the fields present replace the
/// receiver's cached value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
}

impl Metadata {
    /// Merge a delta into this value, replacing the fields it carries.
    pub fn apply(&mut self, update: &MetadataUpdate) {
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if let Some(artist) = &update.artist {
            self.artist = Some(artist.clone());
        }
        if let Some(album) = &update.album {
            self.album = Some(album.clone());
        }
        if let Some(year) = update.year {
            self.year = Some(year);
        }
        if let Some(track) = update.track {
            self.track = Some(track);
        }
        if let Some(members) = &update.group_members {
            self.group_members = members.clone();
        }
        if let Some(commands) = &update.support_commands {
            self.support_commands = commands.clone();
        }
        if let Some(repeat) = update.repeat {
            self.repeat = repeat;
        }
        if let Some(shuffle) = update.shuffle {
            self.shuffle = shuffle;
        }
    }

    /// Compute the delta that turns `self` into `next`.
    ///
    /// Scalar fields compare by equality, list fields element-wise
    /// including order. Fields that did not change are absent from the
    /// returned delta; an unchanged `next` yields an empty delta.
    pub fn diff(&self, next: &Metadata) -> MetadataUpdate {
        MetadataUpdate {
            title: (self.title != next.title).then(|| next.title.clone()).flatten(),
            artist: (self.artist != next.artist).then(|| next.artist.clone()).flatten(),
            album: (self.album != next.album).then(|| next.album.clone()).flatten(),
            year: (self.year != next.year).then_some(next.year).flatten(),
            track: (self.track != next.track).then_some(next.track).flatten(),
            group_members: (self.group_members != next.group_members)
                .then(|| next.group_members.clone()),
            support_commands: (self.support_commands != next.support_commands)
                .then(|| next.support_commands.clone()),
            repeat: (self.repeat != next.repeat).then_some(next.repeat),
            shuffle: (self.shuffle != next.shuffle).then_some(next.shuffle),
        }
    }
}

impl MetadataUpdate {
    /// True when the delta carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.year.is_none()
            && self.track.is_none()
            && self.group_members.is_none()
            && self.support_commands.is_none()
            && self.repeat.is_none()
            && self.shuffle.is_none()
    }
}

impl From<Metadata> for MetadataUpdate {
    /// The full-replacement form: every field present.
    fn from(meta: Metadata) -> Self {
        MetadataUpdate {
            title: meta.title,
            artist: meta.artist,
            album: meta.album,
            year: meta.year,
            track: meta.track,
            group_members: Some(meta.group_members),
            support_commands: Some(meta.support_commands),
            repeat: Some(meta.repeat),
            shuffle: Some(meta.shuffle),
        }
    }
}

/// Format tag of a media art image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtFormat {
    Jpeg,
    Png,
}

impl ArtFormat {
    /// Wire tag of this format.
    pub fn tag(self) -> u8 {
        match self {
            ArtFormat::Jpeg => 0,
            ArtFormat::Png => 1,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ArtFormat::Jpeg),
            1 => Some(ArtFormat::Png),
            _ => None,
        }
    }
}

/// An opaque image blob with its format tag.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaArt {
    pub format: ArtFormat,
    pub data: Bytes,
}

/// Receiver-reported playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

/// State a receiver reports via `player/state`. Relayed opaquely to
/// session subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub playback: PlaybackState,
    /// Volume 0-100.
    pub volume: u8,
    pub muted: bool,
}

/// A media command a receiver sends back toward the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum StreamCommand {
    Play,
    Pause,
    Stop,
    Seek {
        /// Target position in microseconds.
        position: i64,
    },
    Volume {
        /// Volume 0-100.
        volume: u8,
    },
}

/// Playback state of a group, as reported in `group/list`.
///
/// `Paused` is reserved; the server currently only distinguishes
/// playing (active session) from idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Idle,
    Playing,
    Paused,
}

/// One entry of a `group/list` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub state: GroupState,
}

/// Stable id the server assigns to a connection. Unique per server
/// run; a reconnect gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

mod base64_blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> Metadata {
        Metadata {
            title: Some("A".to_string()),
            group_members: vec!["x".to_string(), "y".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn diff_of_identical_metadata_is_empty() {
        let current = metadata();
        let delta = current.diff(&metadata());
        assert!(delta.is_empty());
    }

    #[test]
    fn diff_detects_list_reorder() {
        let current = metadata();
        let mut next = metadata();
        next.group_members = vec!["y".to_string(), "x".to_string()];

        let delta = current.diff(&next);
        assert_eq!(
            delta.group_members,
            Some(vec!["y".to_string(), "x".to_string()])
        );
        assert!(delta.title.is_none());
        assert!(delta.repeat.is_none());
        assert!(!delta.is_empty());
    }

    #[test]
    fn diff_only_carries_changed_fields() {
        let current = metadata();
        let mut next = metadata();
        next.title = Some("B".to_string());
        next.shuffle = true;

        let delta = current.diff(&next);
        assert_eq!(delta.title, Some("B".to_string()));
        assert_eq!(delta.shuffle, Some(true));
        assert!(delta.group_members.is_none());
        assert!(delta.artist.is_none());
    }

    #[test]
    fn apply_merges_delta_into_cache() {
        let mut cached = metadata();
        let delta = MetadataUpdate {
            artist: Some("Someone".to_string()),
            repeat: Some(RepeatMode::All),
            ..Default::default()
        };

        cached.apply(&delta);
        assert_eq!(cached.artist, Some("Someone".to_string()));
        assert_eq!(cached.repeat, RepeatMode::All);
        // Untouched fields survive the merge.
        assert_eq!(cached.title, Some("A".to_string()));
        assert_eq!(cached.group_members, vec!["x", "y"]);
    }

    #[test]
    fn full_update_round_trips_through_apply() {
        let original = metadata();
        let full = MetadataUpdate::from(original.clone());

        let mut rebuilt = Metadata::default();
        rebuilt.apply(&full);
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn codec_header_serializes_as_base64() {
        let info = SessionInfo {
            session_id: "s1".to_string(),
            codec: "pcm".to_string(),
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
            now: 123,
            codec_header: Some(vec![1, 2, 3]),
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["codec_header"], "AQID");
        assert_eq!(json["sessionId"], "s1");

        let back: SessionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }
}
