//! Playback session coordinator.
//!
//! A single worker owns the [`Session`] and drains the command queue in
//! submission order. After every command it publishes a fresh snapshot for
//! status readers and a render frame for the control surface.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use album_deck_types::PlayerState;

use crate::command::{Command, Envelope, Press};
use crate::config::DeviceSettings;
use crate::device::layout::DEFAULT_KEY_COUNT;
use crate::device::{DeviceLayout, DeviceLink, KeyAction};
use crate::engine::{self, EngineError, LoadHandle, PlaybackEngine, SkipOutcome};
use crate::library::{Album, CatalogStore};
use crate::snapshot::{SessionSnapshot, SnapshotStore};

/// How often the idle worker checks the carousel reset timer.
const IDLE_TICK: Duration = Duration::from_millis(500);

/// Mutable playback state. An album is held exactly when not stopped.
#[derive(Debug, Clone)]
pub enum Session {
    Stopped,
    Active {
        album: Arc<Album>,
        track_index: usize,
        handle: LoadHandle,
        paused: bool,
    },
}

impl Session {
    pub fn player_state(&self) -> PlayerState {
        match self {
            Session::Stopped => PlayerState::Stopped,
            Session::Active { paused: true, .. } => PlayerState::Paused,
            Session::Active { paused: false, .. } => PlayerState::Playing,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Coordinator {
    session: Session,
    engine: Box<dyn PlaybackEngine>,
    catalog: Arc<CatalogStore>,
    snapshots: SnapshotStore,
    device: DeviceLink,
    layout: DeviceLayout,
    /// Album restarted by the now-playing key after a stop.
    last_album_id: Option<u32>,
    last_error: Option<String>,
    processed: u64,
}

impl Coordinator {
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        catalog: Arc<CatalogStore>,
        snapshots: SnapshotStore,
        device: DeviceLink,
        settings: &DeviceSettings,
    ) -> Self {
        Self {
            session: Session::Stopped,
            engine,
            catalog,
            snapshots,
            device,
            layout: DeviceLayout::new(DEFAULT_KEY_COUNT, settings.carousel_reset),
            last_album_id: None,
            last_error: None,
            processed: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Publish the initial stopped snapshot and device frame.
    pub fn start(&mut self) {
        self.publish();
    }

    /// Apply one queued command and publish the result.
    pub fn handle(&mut self, envelope: Envelope) -> Flow {
        let Envelope {
            command,
            origin,
            seq,
            enqueued_at,
        } = envelope;
        tracing::debug!(
            command = command.name(),
            origin = %origin,
            seq,
            queued_us = enqueued_at.elapsed().as_micros() as u64,
            "processing command"
        );
        self.processed += 1;
        let flow = self.apply(command, Instant::now());
        self.publish();
        flow
    }

    /// Periodic housekeeping while the queue is idle.
    pub fn on_idle(&mut self, now: Instant) {
        if self.layout.reset_if_idle(now) {
            tracing::debug!("carousel reset to first page");
            self.publish_frame();
        }
    }

    fn apply(&mut self, command: Command, now: Instant) -> Flow {
        match command {
            Command::PlayAlbum { index, album } => self.play_album(index, album),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop => self.stop(),
            Command::Next => self.step(1),
            Command::Previous => self.step(-1),
            Command::TrackEnded { handle } => self.track_ended(handle),
            Command::EngineError { handle, message } => self.engine_failed(handle, message),
            Command::DeviceButton { key, press } => self.device_button(key, press, now),
            Command::DeviceAttached { key_count } => {
                self.layout.set_key_count(key_count);
                self.layout.clamp(self.catalog.snapshot().len());
                tracing::info!(keys = self.layout.key_count(), "control surface attached");
            }
            Command::CatalogUpdated => self.catalog_updated(),
            Command::Shutdown => {
                self.stop();
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    fn play_album(&mut self, index: usize, album: Arc<Album>) {
        if let Session::Active { .. } = self.session {
            self.stop_engine();
        }
        self.last_album_id = Some(album.id);
        match engine::start_track(self.engine.as_mut(), &album, 0, false) {
            Ok(handle) => {
                tracing::info!(album_id = album.id, index, title = %album.title, "playing album");
                self.last_error = None;
                self.session = Session::Active {
                    album,
                    track_index: 0,
                    handle,
                    paused: false,
                };
            }
            Err(e) => self.fail(e),
        }
    }

    fn pause(&mut self) {
        if let Session::Active { paused: false, .. } = self.session {
            match self.engine.pause() {
                Ok(()) => self.set_paused(true),
                Err(e) => self.fail(e),
            }
        }
    }

    fn resume(&mut self) {
        if let Session::Active { paused: true, .. } = self.session {
            match self.engine.resume() {
                Ok(()) => self.set_paused(false),
                Err(e) => self.fail(e),
            }
        }
    }

    fn set_paused(&mut self, value: bool) {
        if let Session::Active { paused, .. } = &mut self.session {
            *paused = value;
        }
    }

    fn stop(&mut self) {
        if let Session::Active { .. } = self.session {
            self.stop_engine();
            self.session = Session::Stopped;
            tracing::info!("playback stopped");
        }
    }

    fn stop_engine(&mut self) {
        if let Err(e) = self.engine.stop() {
            tracing::warn!(error = %e, "engine stop failed");
        }
    }

    /// Move within the album; past the last track stops, before the first is a no-op.
    fn step(&mut self, delta: isize) {
        let Session::Active {
            album,
            track_index,
            paused,
            ..
        } = &self.session
        else {
            return;
        };
        let album = album.clone();
        let (index, paused) = (*track_index, *paused);
        match engine::skip(self.engine.as_mut(), &album, index, delta, paused) {
            Ok(SkipOutcome::Loaded { index, handle }) => {
                tracing::info!(album_id = album.id, track = index, "track changed");
                self.session = Session::Active {
                    album,
                    track_index: index,
                    handle,
                    paused,
                };
            }
            Ok(SkipOutcome::PastEnd) => {
                tracing::info!(album_id = album.id, "end of album");
                self.stop();
            }
            Ok(SkipOutcome::AtStart) => {}
            Err(e) => self.fail(e),
        }
    }

    /// A current track can end just before a queued pause lands; the player has
    /// already dropped it, so advance anyway and keep the paused mode.
    fn track_ended(&mut self, ended: LoadHandle) {
        let current = matches!(
            &self.session,
            Session::Active { handle, .. } if *handle == ended
        );
        if current {
            self.step(1);
        } else {
            tracing::debug!(handle = %ended, "ignoring stale track end");
        }
    }

    fn engine_failed(&mut self, failed: LoadHandle, message: String) {
        let current = matches!(
            &self.session,
            Session::Active { handle, .. } if *handle == failed
        );
        if current {
            self.fail(EngineError::Playback(message));
        } else {
            tracing::debug!(handle = %failed, "ignoring stale engine error");
        }
    }

    /// Engine failures end the session and stay visible in status.
    fn fail(&mut self, error: EngineError) {
        tracing::warn!(error = %error, "playback failed; stopping");
        self.stop_engine();
        self.session = Session::Stopped;
        self.last_error = Some(error.to_string());
    }

    fn device_button(&mut self, key: u8, press: Press, now: Instant) {
        self.layout.touch(now);
        let catalog = self.catalog.snapshot();
        let action = self.layout.action_for(usize::from(key), &catalog);
        let playing = self.session.player_state().is_playing();
        tracing::debug!(key, ?press, ?action, "device action");
        match (action, press) {
            (KeyAction::PlayAlbum { album_id }, Press::Short) => {
                if let Some((index, album)) = catalog.find(album_id) {
                    self.play_album(index, album.clone());
                }
            }
            (KeyAction::NowPlaying, Press::Short) => match self.session.player_state() {
                PlayerState::Playing => self.pause(),
                PlayerState::Paused => self.resume(),
                PlayerState::Stopped | PlayerState::Unknown => {
                    let last = self.last_album_id.and_then(|id| catalog.find(id));
                    if let Some((index, album)) = last {
                        self.play_album(index, album.clone());
                    }
                }
            },
            (KeyAction::NowPlaying, Press::Long) => self.stop(),
            (KeyAction::Previous, Press::Short) if playing => self.step(-1),
            (KeyAction::Next, Press::Short) if playing => self.step(1),
            (KeyAction::Previous, _) => {
                self.layout.page(-1, catalog.len());
                tracing::debug!(offset = self.layout.offset(), "carousel back");
            }
            (KeyAction::Next, _) => {
                self.layout.page(1, catalog.len());
                tracing::debug!(offset = self.layout.offset(), "carousel forward");
            }
            (KeyAction::PlayAlbum { .. }, Press::Long) | (KeyAction::Blank, _) => {}
        }
    }

    fn catalog_updated(&mut self) {
        let catalog = self.catalog.snapshot();
        self.layout.clamp(catalog.len());
        // Adopt the refreshed album record when its tracks are unchanged.
        if let Session::Active { album, .. } = &mut self.session {
            if let Some((_, fresh)) = catalog.find(album.id) {
                if fresh.tracks == album.tracks {
                    *album = fresh.clone();
                }
            }
        }
    }

    fn publish(&mut self) {
        let (album, track_index) = match &self.session {
            Session::Stopped => (None, None),
            Session::Active {
                album, track_index, ..
            } => (Some(album.clone()), Some(*track_index)),
        };
        self.snapshots.publish(SessionSnapshot {
            state: self.session.player_state(),
            album,
            track_index,
            error: self.last_error.clone(),
            seq: self.processed,
        });
        self.publish_frame();
    }

    fn publish_frame(&self) {
        let catalog = self.catalog.snapshot();
        let album = match &self.session {
            Session::Active { album, .. } => Some(album.as_ref()),
            Session::Stopped => None,
        };
        let frame = self
            .layout
            .frame(&catalog, self.session.player_state(), album);
        self.device.publish_frame(frame);
    }
}

/// Run `coordinator` on its own thread until shutdown or queue loss.
pub fn spawn_coordinator(
    mut coordinator: Coordinator,
    commands: Receiver<Envelope>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("coordinator".to_string())
        .spawn(move || {
            coordinator.start();
            loop {
                match commands.recv_timeout(IDLE_TICK) {
                    Ok(envelope) => {
                        if coordinator.handle(envelope) == Flow::Exit {
                            tracing::info!("coordinator shut down");
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => coordinator.on_idle(Instant::now()),
                    Err(RecvTimeoutError::Disconnected) => {
                        tracing::error!(
                            state = coordinator.session().player_state().as_str(),
                            "command queue disconnected; coordinator exiting"
                        );
                        break;
                    }
                }
            }
        })
        .context("spawn coordinator thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandError, Origin, command_queue};
    use crate::device::{ControlGlyph, KeyFace};
    use crate::engine::test_support::{EngineCall, RecordingEngine};
    use crate::events::EventBus;
    use crate::library::test_support::album;

    struct Harness {
        coordinator: Coordinator,
        engine: RecordingEngine,
        snapshots: SnapshotStore,
        catalog: Arc<CatalogStore>,
        device: DeviceLink,
    }

    impl Harness {
        fn new(albums: Vec<Arc<Album>>) -> Self {
            let engine = RecordingEngine::default();
            let catalog = Arc::new(CatalogStore::new(
                albums.iter().map(|a| (**a).clone()).collect(),
            ));
            let snapshots = SnapshotStore::new(EventBus::new());
            let device = DeviceLink::new();
            let mut coordinator = Coordinator::new(
                Box::new(engine.clone()),
                catalog.clone(),
                snapshots.clone(),
                device.clone(),
                &DeviceSettings::default(),
            );
            coordinator.start();
            Self {
                coordinator,
                engine,
                snapshots,
                catalog,
                device,
            }
        }

        fn send(&mut self, command: Command) {
            self.send_from(command, Origin::Http);
        }

        fn send_from(&mut self, command: Command, origin: Origin) {
            self.coordinator.handle(Envelope {
                command,
                origin,
                seq: 0,
                enqueued_at: Instant::now(),
            });
            self.assert_invariants();
        }

        fn play(&mut self, index: usize) {
            let album = self.catalog.snapshot().get(index).cloned().unwrap();
            self.send(Command::PlayAlbum { index, album });
        }

        fn press(&mut self, key: u8, press: Press) {
            self.send_from(Command::DeviceButton { key, press }, Origin::Device);
        }

        fn snapshot(&self) -> Arc<SessionSnapshot> {
            self.snapshots.load()
        }

        fn assert_invariants(&self) {
            let snap = self.snapshot();
            assert_eq!(snap.album.is_none(), snap.state == PlayerState::Stopped);
            if let (Some(album), Some(index)) = (&snap.album, snap.track_index) {
                assert!(index < album.tracks.len());
            }
        }

        fn current_handle(&self) -> LoadHandle {
            match self.coordinator.session() {
                Session::Active { handle, .. } => *handle,
                Session::Stopped => panic!("no active session"),
            }
        }
    }

    #[test]
    fn two_track_album_scenario() {
        let mut h = Harness::new(vec![album(1, "one", 2)]);
        h.play(0);
        let snap = h.snapshot();
        assert_eq!(snap.album.as_ref().unwrap().id, 1);
        assert_eq!(snap.state, PlayerState::Playing);

        h.send(Command::Next);
        let snap = h.snapshot();
        assert_eq!(snap.track_index, Some(1));
        assert_eq!(snap.state, PlayerState::Playing);

        h.send(Command::Next);
        let snap = h.snapshot();
        assert_eq!(snap.state, PlayerState::Stopped);
        assert!(snap.album.is_none());
        assert_eq!(h.engine.take_calls().last(), Some(&EngineCall::Stop));
    }

    #[test]
    fn second_play_replaces_first() {
        let mut h = Harness::new(vec![album(1, "a", 3), album(2, "b", 3)]);
        h.play(0);
        h.send(Command::Next);
        h.play(1);
        let snap = h.snapshot();
        assert_eq!(snap.album.as_ref().unwrap().id, 2);
        assert_eq!(snap.track_index, Some(0));
        assert_eq!(snap.state, PlayerState::Playing);
    }

    #[test]
    fn previous_at_first_track_is_noop() {
        let mut h = Harness::new(vec![album(1, "a", 3)]);
        h.play(0);
        h.engine.take_calls();
        h.send(Command::Previous);
        assert_eq!(h.snapshot().track_index, Some(0));
        assert!(h.engine.take_calls().is_empty());
    }

    #[test]
    fn pause_and_resume_only_from_matching_states() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.send(Command::Pause);
        h.send(Command::Resume);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);
        assert!(h.engine.take_calls().is_empty());

        h.play(0);
        h.engine.take_calls();
        h.send(Command::Resume);
        assert!(h.engine.take_calls().is_empty());
        h.send(Command::Pause);
        h.send(Command::Pause);
        assert_eq!(h.snapshot().state, PlayerState::Paused);
        assert_eq!(h.engine.take_calls(), vec![EngineCall::Pause]);
        h.send(Command::Resume);
        assert_eq!(h.snapshot().state, PlayerState::Playing);
    }

    #[test]
    fn next_while_paused_stays_paused() {
        let mut h = Harness::new(vec![album(1, "a", 3)]);
        h.play(0);
        h.send(Command::Pause);
        h.engine.take_calls();
        h.send(Command::Next);
        let snap = h.snapshot();
        assert_eq!(snap.state, PlayerState::Paused);
        assert_eq!(snap.track_index, Some(1));
        let calls = h.engine.take_calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], EngineCall::Load(_)));
    }

    #[test]
    fn track_end_advances_and_stops_after_last() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.play(0);
        let first = h.current_handle();
        h.send_from(Command::TrackEnded { handle: first }, Origin::Engine);
        assert_eq!(h.snapshot().track_index, Some(1));

        // A late duplicate for the first track must not skip the second.
        h.send_from(Command::TrackEnded { handle: first }, Origin::Engine);
        assert_eq!(h.snapshot().track_index, Some(1));

        let second = h.current_handle();
        h.send_from(Command::TrackEnded { handle: second }, Origin::Engine);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);
    }

    #[test]
    fn track_end_racing_a_pause_advances_paused() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.play(0);
        let first = h.current_handle();
        h.send(Command::Pause);
        h.engine.take_calls();
        h.send_from(Command::TrackEnded { handle: first }, Origin::Engine);
        let snap = h.snapshot();
        assert_eq!(snap.state, PlayerState::Paused);
        assert_eq!(snap.track_index, Some(1));
        assert_ne!(h.current_handle(), first);
        let calls = h.engine.take_calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], EngineCall::Load(_)));

        h.send(Command::Resume);
        assert_eq!(h.snapshot().state, PlayerState::Playing);
        assert_eq!(h.engine.take_calls(), vec![EngineCall::Resume]);

        h.send(Command::Pause);
        let last = h.current_handle();
        h.send_from(Command::TrackEnded { handle: last }, Origin::Engine);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);
    }

    #[test]
    fn stop_wins_over_earlier_queued_track_end() {
        let mut h = Harness::new(vec![album(1, "a", 3)]);
        h.play(0);
        let handle = h.current_handle();
        h.send(Command::Stop);
        h.send_from(Command::TrackEnded { handle }, Origin::Engine);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);
    }

    #[test]
    fn engine_error_stops_and_is_reported_until_next_play() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.play(0);
        let handle = h.current_handle();
        h.send_from(
            Command::EngineError {
                handle,
                message: "corrupt frame".to_string(),
            },
            Origin::Engine,
        );
        let snap = h.snapshot();
        assert_eq!(snap.state, PlayerState::Stopped);
        assert!(snap.error.as_deref().unwrap().contains("corrupt frame"));

        h.play(0);
        assert!(h.snapshot().error.is_none());
    }

    #[test]
    fn offline_engine_on_play_leaves_session_stopped() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.engine.offline.store(true, std::sync::atomic::Ordering::SeqCst);
        h.play(0);
        let snap = h.snapshot();
        assert_eq!(snap.state, PlayerState::Stopped);
        assert!(snap.error.is_some());
    }

    #[test]
    fn now_playing_key_toggles_and_long_press_stops() {
        let mut h = Harness::new(vec![album(1, "a", 2), album(2, "b", 2)]);
        h.press(3, Press::Short);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);

        h.press(1, Press::Short);
        assert_eq!(h.snapshot().album.as_ref().unwrap().id, 2);
        h.press(3, Press::Short);
        assert_eq!(h.snapshot().state, PlayerState::Paused);
        h.press(3, Press::Short);
        assert_eq!(h.snapshot().state, PlayerState::Playing);
        h.press(3, Press::Long);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);

        // Short press after a stop restarts the last album.
        h.press(3, Press::Short);
        assert_eq!(h.snapshot().album.as_ref().unwrap().id, 2);
    }

    #[test]
    fn arrow_keys_change_tracks_while_playing_and_page_otherwise() {
        let albums: Vec<_> = (1..=5).map(|id| album(id, &format!("album-{id}"), 3)).collect();
        let mut h = Harness::new(albums);
        h.press(5, Press::Short);
        assert_eq!(h.coordinator.layout.offset(), 1);
        h.press(4, Press::Long);
        h.press(4, Press::Long);
        assert_eq!(h.coordinator.layout.offset(), 4);

        h.play(0);
        h.press(5, Press::Short);
        assert_eq!(h.snapshot().track_index, Some(1));
        h.press(4, Press::Short);
        assert_eq!(h.snapshot().track_index, Some(0));
        h.press(5, Press::Long);
        assert_eq!(h.snapshot().track_index, Some(0));
        assert_eq!(h.coordinator.layout.offset(), 0);
    }

    #[test]
    fn device_frame_tracks_session() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.play(0);
        let frame = h.device.take_frame().unwrap();
        assert_eq!(frame.faces.len(), 6);
        assert_eq!(frame.faces[5], KeyFace::Control(ControlGlyph::NextTrack));
        h.send(Command::DeviceAttached { key_count: 15 });
        assert_eq!(h.device.take_frame().unwrap().faces.len(), 15);
    }

    #[test]
    fn catalog_refresh_keeps_playing_album_and_adopts_enrichment() {
        let mut h = Harness::new(vec![album(1, "a", 2)]);
        h.play(0);
        assert!(h.catalog.update_album(1, |current| {
            Some(current.with_enrichment(crate::library::Enrichment {
                mbid: "abc".to_string(),
                year: Some(2001),
                cover: None,
            }))
        }));
        h.send_from(Command::CatalogUpdated, Origin::Library);
        let snap = h.snapshot();
        assert_eq!(snap.state, PlayerState::Playing);
        assert!(snap.album.as_ref().unwrap().enrichment.is_some());

        h.catalog.publish(Vec::new());
        h.send_from(Command::CatalogUpdated, Origin::Library);
        assert_eq!(h.snapshot().state, PlayerState::Playing);
        h.send(Command::Next);
        assert_eq!(h.snapshot().track_index, Some(1));
    }

    #[test]
    fn full_queue_rejects_without_touching_session() {
        let h = Harness::new(vec![album(1, "a", 2)]);
        let (sender, rx) = command_queue(2);
        sender.submit(Command::Pause, Origin::Http).unwrap();
        sender.submit(Command::Stop, Origin::Device).unwrap();
        let catalog = h.catalog.snapshot();
        assert_eq!(
            sender.submit_play(&catalog, 0, Origin::Http).unwrap_err(),
            CommandError::Busy
        );
        assert_eq!(rx.len(), 2);
        assert_eq!(h.snapshot().state, PlayerState::Stopped);
    }

    #[test]
    fn worker_keeps_each_sources_order_under_contention() {
        let engine = RecordingEngine::default();
        let catalog = Arc::new(CatalogStore::new(vec![
            (*album(1, "a", 3)).clone(),
            (*album(2, "b", 3)).clone(),
        ]));
        let snapshots = SnapshotStore::new(EventBus::new());
        let device = DeviceLink::new();
        let coordinator = Coordinator::new(
            Box::new(engine.clone()),
            catalog.clone(),
            snapshots.clone(),
            device.clone(),
            &DeviceSettings::default(),
        );
        let (sender, rx) = command_queue(64);
        let worker = spawn_coordinator(coordinator, rx).unwrap();

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let http = {
            let sender = sender.clone();
            let barrier = barrier.clone();
            let snap = catalog.snapshot();
            std::thread::spawn(move || {
                barrier.wait();
                for index in [0, 1, 0, 1] {
                    sender.submit_play(&snap, index, Origin::Http).unwrap();
                    std::thread::yield_now();
                }
                sender.submit(Command::Next, Origin::Http).unwrap();
                sender.submit(Command::Stop, Origin::Http).unwrap();
            })
        };
        let panel = {
            let sender = sender.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for key_count in 6..=20 {
                    sender
                        .submit(Command::DeviceAttached { key_count }, Origin::Device)
                        .unwrap();
                    std::thread::yield_now();
                }
            })
        };
        http.join().unwrap();
        panel.join().unwrap();

        let total = 6 + 15;
        let deadline = Instant::now() + Duration::from_secs(5);
        while snapshots.load().seq < total && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let snap = snapshots.load();
        assert_eq!(snap.seq, total);
        // Each source's last command is applied last among its own.
        assert_eq!(snap.state, PlayerState::Stopped);
        assert_eq!(device.take_frame().unwrap().faces.len(), 20);
        assert_eq!(engine.take_calls().last(), Some(&EngineCall::Stop));

        sender.submit(Command::Shutdown, Origin::Http).unwrap();
        worker.join().unwrap();
    }
}
