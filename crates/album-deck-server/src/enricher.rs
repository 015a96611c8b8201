//! Background album enrichment from a remote metadata source.
//!
//! One worker walks the catalog after every publish, looks up albums it has
//! not seen before, and swaps enriched copies back into the catalog. Results
//! are cached by album fingerprint so a rescan never repeats a lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::command::{Command, CommandSender, Origin};
use crate::events::{EnrichmentEvent, EventBus};
use crate::library::{Album, Artwork, CatalogStore, Enrichment};

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseMatch {
    pub mbid: String,
    pub title: String,
    pub year: Option<i32>,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseLookup {
    Match(ReleaseMatch),
    NoMatch { query: String, top_score: Option<i32> },
}

/// Remote release metadata. Implementations may block; they run off the hot path.
pub trait MetadataSource: Send + Sync {
    fn lookup_release(&self, title: &str, artist: &str) -> Result<ReleaseLookup>;
    /// Front cover for a release, or `None` when the archive has none.
    fn fetch_front_cover(&self, mbid: &str) -> Result<Option<Artwork>>;
}

#[derive(Debug, Clone)]
enum Outcome {
    Enriched(Enrichment),
    NoMatch,
    Failed,
}

/// Wakes the enrichment worker after the catalog changes.
#[derive(Clone)]
pub struct EnricherHandle {
    wake: Sender<()>,
}

impl EnricherHandle {
    /// Request a pass over the current catalog. Coalesces with a pending request.
    pub fn refresh(&self) {
        match self.wake.try_send(()) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("enricher stopped; refresh ignored");
            }
        }
    }
}

pub struct Enricher {
    source: Arc<dyn MetadataSource>,
    catalog: Arc<CatalogStore>,
    commands: CommandSender,
    events: EventBus,
    cache: HashMap<String, Outcome>,
}

impl Enricher {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        catalog: Arc<CatalogStore>,
        commands: CommandSender,
        events: EventBus,
    ) -> Self {
        Self {
            source,
            catalog,
            commands,
            events,
            cache: HashMap::new(),
        }
    }

    /// Enrich every album in the current snapshot that lacks metadata.
    ///
    /// Returns how many albums were updated.
    pub(crate) fn run_pass(&mut self) -> usize {
        let snapshot = self.catalog.snapshot();
        let mut updated = 0usize;
        for album in snapshot.albums() {
            if album.enrichment.is_some() {
                continue;
            }
            let fingerprint = album.fingerprint();
            let outcome = match self.cache.get(&fingerprint) {
                Some(outcome) => outcome.clone(),
                None => {
                    let outcome = self.lookup(album, &fingerprint);
                    self.cache.insert(fingerprint.clone(), outcome.clone());
                    outcome
                }
            };
            if let Outcome::Enriched(enrichment) = outcome {
                if self.apply(album.id, &fingerprint, enrichment) {
                    updated += 1;
                }
            }
        }
        if updated > 0 {
            tracing::info!(albums = updated, "enrichment applied");
            self.events.library_changed();
            if let Err(e) = self.commands.submit_wait(
                Command::CatalogUpdated,
                Origin::Library,
                Duration::from_secs(1),
            ) {
                tracing::warn!(error = %e, "catalog update notification dropped");
            }
        }
        updated
    }

    fn lookup(&self, album: &Album, fingerprint: &str) -> Outcome {
        self.events.enrichment_event(EnrichmentEvent::LookupStart {
            album_id: album.id,
            fingerprint: fingerprint.to_string(),
        });
        match self.source.lookup_release(&album.title, &album.artist) {
            Ok(ReleaseLookup::Match(found)) => {
                tracing::info!(
                    album_id = album.id,
                    mbid = %found.mbid,
                    release = %found.title,
                    score = found.score,
                    "release matched"
                );
                self.events.enrichment_event(EnrichmentEvent::LookupSuccess {
                    album_id: album.id,
                    mbid: found.mbid.clone(),
                });
                let cover = match self.source.fetch_front_cover(&found.mbid) {
                    Ok(Some(cover)) => {
                        self.events.enrichment_event(EnrichmentEvent::CoverFetched {
                            album_id: album.id,
                            bytes: cover.data.len(),
                        });
                        Some(cover)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(album_id = album.id, error = %e, "cover fetch failed");
                        None
                    }
                };
                Outcome::Enriched(Enrichment {
                    mbid: found.mbid,
                    year: found.year,
                    cover,
                })
            }
            Ok(ReleaseLookup::NoMatch { query, top_score }) => {
                tracing::debug!(album_id = album.id, query = %query, ?top_score, "no release match");
                self.events.enrichment_event(EnrichmentEvent::LookupNoMatch {
                    album_id: album.id,
                    query,
                    top_score,
                });
                Outcome::NoMatch
            }
            Err(e) => {
                tracing::warn!(album_id = album.id, error = %e, "release lookup failed");
                self.events.enrichment_event(EnrichmentEvent::LookupFailure {
                    album_id: album.id,
                    error: format!("{e:#}"),
                });
                Outcome::Failed
            }
        }
    }

    /// Enrich the album as it is now, not as it was when the pass started.
    fn apply(&self, id: u32, fingerprint: &str, enrichment: Enrichment) -> bool {
        let applied = self.catalog.update_album(id, |current| {
            (current.enrichment.is_none() && current.fingerprint() == fingerprint)
                .then(|| current.with_enrichment(enrichment))
        });
        if !applied {
            tracing::debug!(album_id = id, "album changed during lookup; enrichment deferred");
        }
        applied
    }
}

/// Start the worker and run an initial pass over the catalog.
pub fn spawn_enricher(enricher: Enricher) -> Result<(EnricherHandle, JoinHandle<()>)> {
    let (wake, rx) = crossbeam_channel::bounded(1);
    let handle = EnricherHandle { wake };
    handle.refresh();
    let join = std::thread::Builder::new()
        .name("enricher".to_string())
        .spawn(move || enricher_main(enricher, rx))
        .context("spawn enricher thread")?;
    Ok((handle, join))
}

fn enricher_main(mut enricher: Enricher, rx: Receiver<()>) {
    while rx.recv().is_ok() {
        enricher.run_pass();
    }
    tracing::debug!("enricher exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::command::command_queue;
    use crate::events::HubEvent;
    use crate::library::test_support::album;

    #[derive(Default)]
    struct FakeSource {
        lookups: Mutex<Vec<String>>,
        fail: bool,
    }

    impl MetadataSource for FakeSource {
        fn lookup_release(&self, title: &str, _artist: &str) -> Result<ReleaseLookup> {
            self.lookups.lock().unwrap().push(title.to_string());
            if self.fail {
                anyhow::bail!("connection refused");
            }
            if title.starts_with("unknown") {
                return Ok(ReleaseLookup::NoMatch {
                    query: format!("release:\"{title}\""),
                    top_score: Some(40),
                });
            }
            Ok(ReleaseLookup::Match(ReleaseMatch {
                mbid: format!("mbid-{title}"),
                title: title.to_string(),
                year: Some(1999),
                score: 100,
            }))
        }

        fn fetch_front_cover(&self, _mbid: &str) -> Result<Option<Artwork>> {
            Ok(Some(Artwork {
                mime_type: "image/jpeg".to_string(),
                data: Arc::from(vec![1u8, 2, 3]),
            }))
        }
    }

    fn albums(titles: &[(u32, &str)]) -> Vec<Album> {
        titles
            .iter()
            .map(|(id, title)| (*album(*id, title, 1)).clone())
            .collect()
    }

    fn make_enricher(source: Arc<FakeSource>, store: Arc<CatalogStore>) -> (Enricher, EventBus) {
        let (commands, _rx) = command_queue(8);
        let events = EventBus::new();
        (
            Enricher::new(source, store, commands, events.clone()),
            events,
        )
    }

    #[test]
    fn matched_album_gets_mbid_year_and_cover() {
        let store = Arc::new(CatalogStore::new(albums(&[(1, "first")])));
        let source = Arc::new(FakeSource::default());
        let (mut enricher, events) = make_enricher(source, store.clone());
        let mut rx = events.subscribe();

        assert_eq!(enricher.run_pass(), 1);
        let catalog = store.snapshot();
        let enriched = catalog.get(0).unwrap();
        let enrichment = enriched.enrichment.as_ref().unwrap();
        assert_eq!(enrichment.mbid, "mbid-first");
        assert_eq!(enrichment.year, Some(1999));
        assert_eq!(enriched.display_artwork().unwrap().data.len(), 3);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                HubEvent::Enrichment(EnrichmentEvent::LookupStart { .. }) => "start",
                HubEvent::Enrichment(EnrichmentEvent::LookupSuccess { .. }) => "success",
                HubEvent::Enrichment(EnrichmentEvent::CoverFetched { .. }) => "cover",
                HubEvent::LibraryChanged => "library",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["start", "success", "cover", "library"]);
    }

    #[test]
    fn duplicate_fingerprints_share_one_lookup() {
        let store = Arc::new(CatalogStore::new(albums(&[(1, "same"), (2, "same")])));
        let source = Arc::new(FakeSource::default());
        let (mut enricher, _events) = make_enricher(source.clone(), store.clone());

        assert_eq!(enricher.run_pass(), 2);
        assert_eq!(source.lookups.lock().unwrap().len(), 1);
    }

    #[test]
    fn rescanned_albums_reuse_cached_outcomes() {
        let store = Arc::new(CatalogStore::new(albums(&[(1, "first"), (2, "unknown-b")])));
        let source = Arc::new(FakeSource::default());
        let (mut enricher, _events) = make_enricher(source.clone(), store.clone());
        enricher.run_pass();

        store.publish(albums(&[(1, "first"), (2, "unknown-b")]));
        assert!(store.snapshot().get(0).unwrap().enrichment.is_none());
        assert_eq!(enricher.run_pass(), 1);
        assert!(store.snapshot().get(0).unwrap().enrichment.is_some());
        assert_eq!(source.lookups.lock().unwrap().len(), 2);
    }

    #[test]
    fn failures_are_reported_and_not_retried() {
        let store = Arc::new(CatalogStore::new(albums(&[(1, "first")])));
        let source = Arc::new(FakeSource {
            fail: true,
            ..Default::default()
        });
        let (mut enricher, events) = make_enricher(source.clone(), store.clone());
        let mut rx = events.subscribe();

        assert_eq!(enricher.run_pass(), 0);
        assert_eq!(enricher.run_pass(), 0);
        assert_eq!(source.lookups.lock().unwrap().len(), 1);
        let _start = rx.try_recv().unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(HubEvent::Enrichment(EnrichmentEvent::LookupFailure { album_id: 1, .. }))
        ));
    }

    /// Publishes a rescan (album 1 grows a track) while the lookup is in flight.
    struct RescanDuringLookup {
        store: Arc<CatalogStore>,
    }

    impl MetadataSource for RescanDuringLookup {
        fn lookup_release(&self, title: &str, _artist: &str) -> Result<ReleaseLookup> {
            self.store.publish(vec![(*album(1, title, 3)).clone()]);
            Ok(ReleaseLookup::Match(ReleaseMatch {
                mbid: "mbid-rescanned".to_string(),
                title: title.to_string(),
                year: None,
                score: 95,
            }))
        }

        fn fetch_front_cover(&self, _mbid: &str) -> Result<Option<Artwork>> {
            Ok(None)
        }
    }

    #[test]
    fn enrichment_lands_on_record_published_mid_lookup() {
        let store = Arc::new(CatalogStore::new(vec![(*album(1, "first", 2)).clone()]));
        let (commands, _rx) = command_queue(8);
        let source = Arc::new(RescanDuringLookup {
            store: store.clone(),
        });
        let mut enricher = Enricher::new(source, store.clone(), commands, EventBus::new());

        assert_eq!(enricher.run_pass(), 1);
        let catalog = store.snapshot();
        let current = catalog.get(0).unwrap();
        assert_eq!(current.tracks.len(), 3);
        assert_eq!(current.enrichment.as_ref().unwrap().mbid, "mbid-rescanned");
    }

    #[test]
    fn renamed_album_is_not_given_stale_enrichment() {
        let store = Arc::new(CatalogStore::new(vec![(*album(1, "first", 2)).clone()]));
        let (commands, _rx) = command_queue(8);
        let source = Arc::new(FakeSource::default());
        let mut enricher = Enricher::new(source, store.clone(), commands, EventBus::new());
        let stale = store.snapshot().get(0).cloned().unwrap();

        store.publish(vec![(*album(1, "renamed", 2)).clone()]);
        assert!(!enricher.apply(stale.id, &stale.fingerprint(), Enrichment {
            mbid: "mbid-first".to_string(),
            year: None,
            cover: None,
        }));
        assert!(store.snapshot().get(0).unwrap().enrichment.is_none());
    }

    #[test]
    fn applied_enrichment_notifies_coordinator() {
        let store = Arc::new(CatalogStore::new(albums(&[(1, "first")])));
        let (commands, rx) = command_queue(8);
        let mut enricher = Enricher::new(
            Arc::new(FakeSource::default()),
            store,
            commands,
            EventBus::new(),
        );
        enricher.run_pass();
        let envelope = rx.try_recv().unwrap();
        assert!(matches!(envelope.command, Command::CatalogUpdated));
        assert_eq!(envelope.origin, Origin::Library);
    }
}
