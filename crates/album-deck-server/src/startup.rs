//! Actix server startup + app wiring.
//!
//! Builds the shared state, spawns the worker threads, and serves the routes.

use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, web};
use anyhow::Result;
use futures_util::future::{LocalBoxFuture, Ready, ok};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::command::{Command, CommandSender, Origin, command_queue};
use crate::config;
use crate::coordinator::{Coordinator, spawn_coordinator};
use crate::device::{DeviceLink, SurfaceConnector, spawn_device_bridge};
use crate::enricher::{Enricher, spawn_enricher};
use crate::events::EventBus;
use crate::library::{CatalogStore, scan_albums};
use crate::local_player::LocalPlayer;
use crate::musicbrainz::MusicBrainzClient;
use crate::openapi;
use crate::snapshot::SnapshotStore;
use crate::state::{AppState, LibrarySource};

const SHUTDOWN_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Build server state and start the Actix HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let media_dir = resolve_media_dir(args.media_dir, &cfg)?;
    let playlists = config::playlists_from_config(&cfg);
    let settings = config::device_settings_from_config(&cfg);
    tracing::info!(
        bind = %bind,
        media_dir = %media_dir.display(),
        playlists = playlists.len(),
        "starting album-deck-server"
    );

    let albums = scan_albums(&media_dir, &playlists)?;
    let catalog = Arc::new(CatalogStore::new(albums));
    tracing::info!(albums = catalog.snapshot().len(), "library scanned");

    let events = EventBus::new();
    let snapshots = SnapshotStore::new(events.clone());
    let (commands, command_rx) = command_queue(config::queue_capacity_from_config(&cfg));
    let device = DeviceLink::new();

    let player = LocalPlayer::spawn(commands.clone())?;
    let position = player.position();
    let coordinator = Coordinator::new(
        Box::new(player),
        catalog.clone(),
        snapshots.clone(),
        device.clone(),
        &settings,
    );
    let coordinator_thread = spawn_coordinator(coordinator, command_rx)?;

    if settings.enabled {
        spawn_device_bridge(
            surface_connector(),
            device.clone(),
            commands.clone(),
            settings.clone(),
        )?;
    } else {
        tracing::info!("control surface disabled by config");
    }

    let enricher = match MusicBrainzClient::new(cfg.musicbrainz.as_ref())? {
        Some(client) => {
            let (handle, _join) = spawn_enricher(Enricher::new(
                client,
                catalog.clone(),
                commands.clone(),
                events.clone(),
            ))?;
            Some(handle)
        }
        None => {
            tracing::info!("musicbrainz enrichment disabled");
            None
        }
    };

    let state = web::Data::new(AppState::new(
        catalog,
        commands.clone(),
        snapshots,
        device.clone(),
        position,
        events,
        LibrarySource {
            media_dir,
            playlists,
        },
        enricher,
    ));
    if let Some(interval) = config::rescan_interval_from_config(&cfg) {
        spawn_periodic_rescan(state.clone(), interval)?;
    }
    setup_shutdown(commands.clone(), device.clone());

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(FilteredLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(web::scope("/api").configure(api::configure))
            .configure(api::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    stop_workers(&commands, &device);
    if coordinator_thread.join().is_err() {
        tracing::error!("coordinator thread panicked");
    }
    Ok(())
}

#[cfg(feature = "streamdeck")]
fn surface_connector() -> Box<dyn SurfaceConnector> {
    Box::new(crate::device::streamdeck::StreamDeckConnector)
}

#[cfg(not(feature = "streamdeck"))]
fn surface_connector() -> Box<dyn SurfaceConnector> {
    tracing::info!("built without stream deck support; control surface stays offline");
    Box::new(crate::device::NullConnector)
}

fn spawn_periodic_rescan(state: web::Data<AppState>, interval: Duration) -> Result<()> {
    tracing::info!(interval_secs = interval.as_secs(), "periodic rescan enabled");
    std::thread::Builder::new()
        .name("rescan".to_string())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                if let Err(e) = state.rescan() {
                    tracing::warn!(error = %format!("{e:#}"), "periodic rescan failed");
                }
            }
        })?;
    Ok(())
}

fn stop_workers(commands: &CommandSender, device: &DeviceLink) {
    if device.is_shutting_down() {
        return;
    }
    device.request_shutdown();
    if let Err(e) = commands.submit_wait(Command::Shutdown, Origin::System, SHUTDOWN_SUBMIT_TIMEOUT)
    {
        tracing::warn!(error = %e, "shutdown command not delivered");
    }
}

/// Install Ctrl+C handler to stop playback cleanly.
fn setup_shutdown(commands: CommandSender, device: DeviceLink) {
    let system = actix_web::rt::System::try_current();
    let _ = ctrlc::set_handler(move || {
        stop_workers(&commands, &device);
        match system.as_ref() {
            Some(system) => system.stop(),
            None => std::process::exit(0),
        }
    });
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    let path = path.strip_prefix("/api").unwrap_or(path);
    !(path == "/status" || path.ends_with("/stream"))
}

/// Actix middleware that filters noisy paths from logging.
struct FilteredLogger;

impl<S, B> actix_web::dev::Transform<S, ServiceRequest> for FilteredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FilteredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(FilteredLoggerMiddleware { service })
    }
}

/// Service wrapper that applies the logging filter.
struct FilteredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for FilteredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_log = should_log_path(&path);
        let method = req.method().clone();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let start = std::time::Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            if should_log {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = %res.status().as_u16(),
                    peer = %peer,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "http request"
                );
            }
            Ok(res)
        })
    }
}

/// Load server config from `--config`, `config.toml` beside the binary, or defaults.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "using config beside executable");
            config::ServerConfig::load(&path)
        }
        _ => Ok(config::ServerConfig::default()),
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(
    bind: Option<std::net::SocketAddr>,
    cfg: &config::ServerConfig,
) -> Result<std::net::SocketAddr> {
    match bind {
        Some(addr) => Ok(addr),
        None => config::bind_from_config(cfg),
    }
}

/// Resolve the media directory from args + config.
fn resolve_media_dir(dir: Option<PathBuf>, cfg: &config::ServerConfig) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => config::media_dir_from_config(cfg),
    }
}
