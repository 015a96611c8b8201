//! Shared application state.
//!
//! Everything here is either immutable, a snapshot handle, or a queue sender;
//! handlers never mutate the session directly.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::command::{Command, CommandSender, Origin};
use crate::config::PlaylistConfig;
use crate::device::DeviceLink;
use crate::enricher::EnricherHandle;
use crate::events::EventBus;
use crate::library::{Catalog, CatalogStore, scan_albums};
use crate::local_player::PositionProbe;
use crate::snapshot::SnapshotStore;

/// Where albums come from on rescan.
#[derive(Debug, Clone)]
pub struct LibrarySource {
    pub media_dir: PathBuf,
    pub playlists: Vec<PlaylistConfig>,
}

pub struct AppState {
    pub catalog: Arc<CatalogStore>,
    pub commands: CommandSender,
    pub snapshots: SnapshotStore,
    /// Connection flag and render channel shared with the device bridge.
    pub device: DeviceLink,
    pub position: PositionProbe,
    pub events: EventBus,
    pub source: LibrarySource,
    pub enricher: Option<EnricherHandle>,
    /// Serializes rescans; readers never take it.
    rescan_lock: Mutex<()>,
}

impl AppState {
    pub fn new(
        catalog: Arc<CatalogStore>,
        commands: CommandSender,
        snapshots: SnapshotStore,
        device: DeviceLink,
        position: PositionProbe,
        events: EventBus,
        source: LibrarySource,
        enricher: Option<EnricherHandle>,
    ) -> Self {
        Self {
            catalog,
            commands,
            snapshots,
            device,
            position,
            events,
            source,
            enricher,
            rescan_lock: Mutex::new(()),
        }
    }

    /// Rebuild the catalog from disk and publish it.
    ///
    /// Blocks on filesystem I/O; call from a blocking context.
    pub fn rescan(&self) -> Result<Arc<Catalog>> {
        let _guard = self.rescan_lock.lock().unwrap_or_else(|e| e.into_inner());
        let albums = scan_albums(&self.source.media_dir, &self.source.playlists)
            .with_context(|| format!("rescan {:?}", self.source.media_dir))?;
        let catalog = self.catalog.publish(albums);
        tracing::info!(
            albums = catalog.len(),
            generation = catalog.generation(),
            "catalog published"
        );
        self.events.library_changed();
        if let Err(e) = self.commands.submit_wait(
            Command::CatalogUpdated,
            Origin::Library,
            Duration::from_secs(1),
        ) {
            tracing::warn!(error = %e, "catalog update notification dropped");
        }
        if let Some(enricher) = &self.enricher {
            enricher.refresh();
        }
        Ok(catalog)
    }
}
