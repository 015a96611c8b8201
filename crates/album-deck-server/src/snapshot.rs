//! Published session snapshots.
//!
//! The coordinator is the only writer; HTTP handlers and streams read the
//! latest `Arc` without ever waiting on command processing.

use std::sync::{Arc, RwLock};

use album_deck_types::{PlayerState, StatusResponse};

use crate::events::EventBus;
use crate::library::Album;

/// Immutable view of the playback session at one point in time.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub state: PlayerState,
    /// Set exactly when `state` is not stopped.
    pub album: Option<Arc<Album>>,
    pub track_index: Option<usize>,
    /// Last engine failure message.
    pub error: Option<String>,
    /// Number of commands processed when this snapshot was taken.
    pub seq: u64,
}

impl SessionSnapshot {
    /// Render the wire status, merging in live device and engine readings.
    pub fn to_response(&self, is_connected: bool, elapsed_ms: Option<u64>) -> StatusResponse {
        let current_track = match (&self.album, self.track_index) {
            (Some(album), Some(index)) => album.tracks.get(index).map(|t| t.to_info()),
            _ => None,
        };
        let playing = self.album.is_some();
        StatusResponse {
            current_playing_album: self.album.as_ref().map(|album| album.to_info()),
            player_state: self.state,
            is_connected,
            current_track,
            elapsed_ms: if playing { elapsed_ms } else { None },
            error: self.error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<RwLock<Arc<SessionSnapshot>>>,
    events: EventBus,
}

impl SnapshotStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(SessionSnapshot::default()))),
            events,
        }
    }

    /// Latest published snapshot.
    pub fn load(&self) -> Arc<SessionSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Atomically replace the snapshot and notify subscribers.
    pub fn publish(&self, snapshot: SessionSnapshot) {
        {
            let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::new(snapshot);
        }
        self.events.status_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HubEvent;
    use crate::library::test_support::album;

    #[test]
    fn default_snapshot_is_stopped_with_no_album() {
        let store = SnapshotStore::new(EventBus::new());
        let status = store.load().to_response(false, Some(10));
        assert_eq!(status.player_state, PlayerState::Stopped);
        assert!(status.current_playing_album.is_none());
        assert!(status.elapsed_ms.is_none());
    }

    #[test]
    fn publish_replaces_snapshot_and_notifies() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let store = SnapshotStore::new(events);
        let held = store.load();
        store.publish(SessionSnapshot {
            state: PlayerState::Playing,
            album: Some(album(1, "one", 2)),
            track_index: Some(1),
            error: None,
            seq: 3,
        });
        assert_eq!(held.state, PlayerState::Stopped);
        let status = store.load().to_response(true, Some(1500));
        assert_eq!(status.current_playing_album.unwrap().id, 1);
        assert_eq!(status.current_track.unwrap().index, 1);
        assert_eq!(status.elapsed_ms, Some(1500));
        assert!(status.is_connected);
        assert!(matches!(rx.try_recv(), Ok(HubEvent::StatusChanged)));
    }
}
