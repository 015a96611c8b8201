//! Catalog API handlers.

use actix_web::http::header;
use actix_web::{HttpResponse, Responder, get, post, web};

use album_deck_types::{AlbumInfo, RescanResponse};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/albums",
    responses(
        (status = 200, description = "Albums in catalog order", body = Vec<AlbumInfo>)
    )
)]
#[get("/albums")]
/// List every album in the current catalog, in the order `/play` indexes them.
pub async fn albums(state: web::Data<AppState>) -> impl Responder {
    let catalog = state.catalog.snapshot();
    let albums: Vec<AlbumInfo> = catalog.albums().iter().map(|a| a.to_info()).collect();
    HttpResponse::Ok().json(albums)
}

#[utoipa::path(
    get,
    path = "/albums/{id}/artwork",
    params(
        ("id" = u32, Path, description = "Album id")
    ),
    responses(
        (status = 200, description = "Album artwork image"),
        (status = 404, description = "Unknown album or no artwork")
    )
)]
#[get("/albums/{id}/artwork")]
pub async fn album_artwork(state: web::Data<AppState>, id: web::Path<u32>) -> impl Responder {
    let id = id.into_inner();
    let catalog = state.catalog.snapshot();
    let Some((_, album)) = catalog.find(id) else {
        return HttpResponse::NotFound().body(format!("unknown album {id}"));
    };
    match album.display_artwork() {
        Some(art) => HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, art.mime_type.clone()))
            .insert_header((header::CACHE_CONTROL, "max-age=3600"))
            .body(art.data.to_vec()),
        None => HttpResponse::NotFound().body("album has no artwork"),
    }
}

#[utoipa::path(
    post,
    path = "/library/rescan",
    responses(
        (status = 200, description = "Catalog rebuilt", body = RescanResponse),
        (status = 500, description = "Scan failed")
    )
)]
#[post("/library/rescan")]
/// Rebuild the catalog from the media directory.
pub async fn rescan(state: web::Data<AppState>) -> impl Responder {
    let worker = state.clone();
    match web::block(move || worker.rescan()).await {
        Ok(Ok(catalog)) => HttpResponse::Ok().json(RescanResponse {
            albums: catalog.len(),
        }),
        Ok(Err(err)) => {
            tracing::warn!(error = %format!("{err:#}"), "rescan failed");
            HttpResponse::InternalServerError().body(format!("{err:#}"))
        }
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}
