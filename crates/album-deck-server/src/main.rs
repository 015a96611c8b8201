mod api;
mod command;
mod config;
mod coordinator;
mod device;
mod engine;
mod enricher;
mod events;
mod library;
mod local_player;
mod musicbrainz;
mod openapi;
mod snapshot;
mod startup;
mod state;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "album-deck-server", version)]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:5000
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Media library root directory
    #[arg(long)]
    media_dir: Option<PathBuf>,

    /// Optional server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,album_deck_server=info")
        }))
        .init();

    startup::run(args).await
}
