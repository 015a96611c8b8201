//! HTTP API handlers.
//!
//! Defines the Actix routes for the catalog, playback control, and event
//! streams. Every route is served both at the root and under `/api`.

pub mod health;
pub mod library;
pub mod playback;
pub mod streams;

use actix_web::web;

pub use library::{album_artwork, albums, rescan};
pub use playback::{next_track, pause, play, previous_track, resume, status, stop};
pub use streams::{library_stream, status_stream};

/// Register every API route on `cfg`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(albums)
        .service(album_artwork)
        .service(rescan)
        .service(status)
        .service(status_stream)
        .service(library_stream)
        .service(play)
        .service(stop)
        .service(pause)
        .service(resume)
        .service(next_track)
        .service(previous_track)
        .service(health::health);
}
