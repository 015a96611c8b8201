use actix_web::{HttpResponse, Responder, get};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_sha: String,
    pub build_date: String,
}

/// Basic health check with build information.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("ALBUM_DECK_GIT_SHA").to_string(),
        build_date: env!("ALBUM_DECK_BUILD_DATE").to_string(),
    })
}
