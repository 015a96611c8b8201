//! In-process event bus for server-side updates.
//!
//! Provides a lightweight broadcast channel for SSE subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

/// Progress of background metadata enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    LookupStart { album_id: u32, fingerprint: String },
    LookupSuccess { album_id: u32, mbid: String },
    LookupNoMatch { album_id: u32, query: String, top_score: Option<i32> },
    LookupFailure { album_id: u32, error: String },
    CoverFetched { album_id: u32, bytes: usize },
}

/// Server event payloads published by core services.
#[derive(Debug, Clone)]
pub enum HubEvent {
    StatusChanged,
    LibraryChanged,
    Enrichment(EnrichmentEvent),
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Notify subscribers that a new session snapshot was published.
    pub fn status_changed(&self) {
        let _ = self.sender.send(HubEvent::StatusChanged);
    }

    /// Notify subscribers that the catalog snapshot was replaced.
    pub fn library_changed(&self) {
        let _ = self.sender.send(HubEvent::LibraryChanged);
    }

    pub fn enrichment_event(&self, event: EnrichmentEvent) {
        let _ = self.sender.send(HubEvent::Enrichment(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.library_changed();
        bus.status_changed();
        assert!(matches!(rx.try_recv(), Ok(HubEvent::LibraryChanged)));
        assert!(matches!(rx.try_recv(), Ok(HubEvent::StatusChanged)));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.enrichment_event(EnrichmentEvent::LookupFailure {
            album_id: 1,
            error: "offline".to_string(),
        });
    }

    #[test]
    fn enrichment_event_serializes_with_kind_tag() {
        let json = serde_json::to_value(EnrichmentEvent::CoverFetched { album_id: 7, bytes: 10 })
            .unwrap();
        assert_eq!(json["kind"], "cover_fetched");
        assert_eq!(json["album_id"], 7);
    }
}
