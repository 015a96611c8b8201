use serde::{Deserialize, Serialize};

/// Transport state reported to clients.
///
/// Clients must treat anything other than `"playing"` as "not currently playing".
/// Values this build does not know deserialize to [`PlayerState::Unknown`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// Audio is being rendered.
    Playing,
    /// A track is loaded but held.
    Paused,
    /// Nothing is loaded.
    #[default]
    Stopped,
    /// Forward-compatibility fallback for unrecognized states.
    #[serde(other)]
    Unknown,
}

impl PlayerState {
    /// Exact wire string for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Unknown => "unknown",
        }
    }

    pub fn is_playing(self) -> bool {
        self == PlayerState::Playing
    }
}

/// Track entry inside an album.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TrackInfo {
    /// Zero-based position within the album.
    pub index: usize,
    /// Display title (tag title or file stem).
    pub title: String,
    /// Duration in seconds (0 when unknown).
    pub duration: f64,
}

/// Remote metadata attached to an album after enrichment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AlbumEnrichment {
    /// MusicBrainz release id.
    pub mbid: String,
    /// Release year, if known.
    pub year: Option<i32>,
}

/// Album as listed by `GET /albums`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AlbumInfo {
    /// Stable album id (survives rescans).
    pub id: u32,
    pub title: String,
    pub artist: String,
    /// Tracks in play order.
    pub tracks: Vec<TrackInfo>,
    /// `true` when `/albums/{id}/artwork` will return an image.
    #[serde(default)]
    pub has_artwork: bool,
    #[serde(default)]
    pub enrichment: Option<AlbumEnrichment>,
}

/// Session status returned by `GET /status`.
///
/// The first three fields form the legacy shape; the rest are additive.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatusResponse {
    /// Album owning the session, `null` exactly when stopped.
    pub current_playing_album: Option<AlbumInfo>,
    pub player_state: PlayerState,
    /// Control surface connectivity only; never reflects engine health.
    pub is_connected: bool,
    /// Current track within `current_playing_album`.
    #[serde(default)]
    pub current_track: Option<TrackInfo>,
    /// Best-effort playback position in milliseconds.
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    /// Last engine failure, cleared by the next album start.
    #[serde(default)]
    pub error: Option<String>,
}

/// Response for `POST /play`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PlayResponse {
    /// Album that was queued for playback.
    pub album: AlbumInfo,
}

/// Response for `POST /library/rescan`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RescanResponse {
    /// Album count in the new catalog.
    pub albums: usize,
}
