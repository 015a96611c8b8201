use utoipa::OpenApi;

use album_deck_types::{
    AlbumEnrichment, AlbumInfo, PlayResponse, PlayerState, RescanResponse, StatusResponse,
    TrackInfo,
};

use crate::api;
use crate::events::EnrichmentEvent;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::library::albums,
        api::library::album_artwork,
        api::library::rescan,
        api::playback::status,
        api::playback::play,
        api::playback::stop,
        api::playback::pause,
        api::playback::resume,
        api::playback::next_track,
        api::playback::previous_track,
        api::streams::status_stream,
        api::streams::library_stream,
        api::health::health,
    ),
    components(
        schemas(
            AlbumInfo,
            AlbumEnrichment,
            TrackInfo,
            PlayerState,
            StatusResponse,
            PlayResponse,
            RescanResponse,
            EnrichmentEvent,
            api::health::HealthResponse,
        )
    ),
    tags(
        (name = "album-deck-server", description = "Album playback control API")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_control_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/albums", "/status", "/play", "/next_track", "/library/rescan"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
