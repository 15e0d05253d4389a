use serde::{Deserialize, Serialize};

/// Descriptive metadata of a loaded track.
///
/// Created once by whatever resolved the source and never mutated afterwards.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AudioTrackInfo {
    /// Track title.
    pub title: String,
    /// Track author/artist.
    pub author: String,
    /// Length in milliseconds, `None` when unknown (live streams).
    pub length_ms: Option<u64>,
    /// Source-specific identifier (file path, video id, ...).
    pub identifier: String,
    /// `true` for live streams that cannot be seeked.
    pub is_stream: bool,
    /// Canonical URI of the track, if any.
    pub uri: Option<String>,
    /// Artwork URL, if any.
    pub artwork_url: Option<String>,
}

impl AudioTrackInfo {
    /// Minimal info for a finite, seekable track.
    pub fn new(identifier: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Reason why a track stopped being the player's active track.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TrackEndReason {
    /// Natural end of the source.
    Finished,
    /// The track failed to start or failed while playing.
    LoadFailed,
    /// Playback was explicitly stopped.
    Stopped,
    /// Another track was started in its place.
    Replaced,
    /// The player was destroyed.
    Cleanup,
}

impl TrackEndReason {
    /// Whether a queue-driving caller should advance to the next track.
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

/// How unexpected a track failure is.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected content problem (broken or unsupported source).
    Common,
    /// Unexpected, but the cause is probably outside this process.
    Suspicious,
    /// Internal fault; worth a bug report.
    Fault,
}

/// Lifecycle state of a single track.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    #[default]
    Idle,
    Initializing,
    Playing,
    Paused,
    Seeking,
    Stopping,
    Finished,
    Errored,
}

impl TrackState {
    /// `true` once the track can no longer produce audio.
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackState::Finished | TrackState::Errored)
    }
}

/// Point-in-time view of a player, suitable for status endpoints and logs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PlayerStatus {
    /// Identifier of the active track.
    pub now_playing: Option<String>,
    /// Title of the active track.
    pub title: Option<String>,
    /// State of the active track.
    pub track_state: Option<TrackState>,
    /// `true` when the player is paused.
    pub paused: bool,
    /// Timecode of the last delivered frame.
    pub position_ms: Option<u64>,
    /// Track length when known.
    pub duration_ms: Option<u64>,
    /// Current volume (0..=1000).
    pub volume: u16,
    /// Frames currently waiting in the frame buffer.
    pub buffered_frames: Option<u64>,
    /// Frame buffer capacity.
    pub buffer_capacity_frames: Option<u64>,
    /// End reason of the most recent track.
    pub end_reason: Option<TrackEndReason>,
}
