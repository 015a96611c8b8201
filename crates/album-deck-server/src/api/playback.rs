//! Playback-related API handlers.
//!
//! Handlers only validate and enqueue; effects show up in the next status read.

use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Deserialize;
use utoipa::IntoParams;

use album_deck_types::{PlayResponse, StatusResponse};

use crate::command::{Command, Origin};
use crate::state::AppState;

/// Legacy query form of the play request.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PlayQuery {
    /// Catalog index; takes precedence over the body.
    pub album_index: Option<i64>,
}

/// Compose the wire status from the latest snapshot and live readings.
pub(crate) fn current_status(state: &AppState) -> StatusResponse {
    let snapshot = state.snapshots.load();
    snapshot.to_response(state.device.is_connected(), state.position.elapsed_ms())
}

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Current playback session", body = StatusResponse)
    )
)]
#[get("/status")]
/// Return the current playback session.
pub async fn status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(current_status(&state))
}

fn parse_album_index(query: &PlayQuery, body: &[u8]) -> Result<usize, HttpResponse> {
    let raw = match query.album_index {
        Some(index) => index,
        None => serde_json::from_slice::<i64>(body).map_err(|_| {
            HttpResponse::BadRequest().body("expected an integer album index")
        })?,
    };
    usize::try_from(raw)
        .map_err(|_| HttpResponse::BadRequest().body(format!("album index {raw} out of range")))
}

#[utoipa::path(
    post,
    path = "/play",
    params(PlayQuery),
    request_body(content = i64, description = "Album index", content_type = "application/json"),
    responses(
        (status = 200, description = "Album queued for playback", body = PlayResponse),
        (status = 400, description = "Missing or out-of-range album index"),
        (status = 503, description = "Command queue full")
    )
)]
#[post("/play")]
/// Play the album at the given catalog index from its first track.
pub async fn play(
    state: web::Data<AppState>,
    query: web::Query<PlayQuery>,
    body: web::Bytes,
) -> impl Responder {
    let index = match parse_album_index(&query, &body) {
        Ok(index) => index,
        Err(resp) => return resp,
    };
    let catalog = state.catalog.snapshot();
    match state.commands.submit_play(&catalog, index, Origin::Http) {
        Ok(album) => {
            tracing::info!(album_id = album.id, index, "play request");
            HttpResponse::Ok().json(PlayResponse {
                album: album.to_info(),
            })
        }
        Err(err) => {
            tracing::debug!(index, error = %err, "play request rejected");
            err.into_response()
        }
    }
}

fn submit(state: &AppState, command: Command) -> HttpResponse {
    let name = command.name();
    match state.commands.submit(command, Origin::Http) {
        Ok(seq) => {
            tracing::debug!(command = name, seq, "command queued");
            HttpResponse::Ok().finish()
        }
        Err(err) => {
            tracing::warn!(command = name, error = %err, "command rejected");
            err.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/stop",
    responses(
        (status = 200, description = "Stop queued"),
        (status = 503, description = "Command queue full")
    )
)]
#[post("/stop")]
/// Stop playback and clear the current album.
pub async fn stop(state: web::Data<AppState>) -> impl Responder {
    submit(&state, Command::Stop)
}

#[utoipa::path(
    post,
    path = "/pause",
    responses(
        (status = 200, description = "Pause queued"),
        (status = 503, description = "Command queue full")
    )
)]
#[post("/pause")]
/// Pause; ignored unless playing.
pub async fn pause(state: web::Data<AppState>) -> impl Responder {
    submit(&state, Command::Pause)
}

#[utoipa::path(
    post,
    path = "/resume",
    responses(
        (status = 200, description = "Resume queued"),
        (status = 503, description = "Command queue full")
    )
)]
#[post("/resume")]
/// Resume; ignored unless paused.
pub async fn resume(state: web::Data<AppState>) -> impl Responder {
    submit(&state, Command::Resume)
}

#[utoipa::path(
    post,
    path = "/next_track",
    responses(
        (status = 200, description = "Next queued"),
        (status = 503, description = "Command queue full")
    )
)]
#[post("/next_track")]
/// Advance one track; past the last track playback stops.
pub async fn next_track(state: web::Data<AppState>) -> impl Responder {
    submit(&state, Command::Next)
}

#[utoipa::path(
    post,
    path = "/previous_track",
    responses(
        (status = 200, description = "Previous queued"),
        (status = 503, description = "Command queue full")
    )
)]
#[post("/previous_track")]
pub async fn previous_track(state: web::Data<AppState>) -> impl Responder {
    submit(&state, Command::Previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_index_wins_over_body() {
        let query = PlayQuery {
            album_index: Some(3),
        };
        assert_eq!(parse_album_index(&query, b"1").ok(), Some(3));
    }

    #[test]
    fn body_must_be_a_non_negative_integer() {
        let query = PlayQuery { album_index: None };
        assert_eq!(parse_album_index(&query, b"2").ok(), Some(2));
        assert!(parse_album_index(&query, b"-1").is_err());
        assert!(parse_album_index(&query, b"\"two\"").is_err());
        assert!(parse_album_index(&query, b"").is_err());
    }
}
