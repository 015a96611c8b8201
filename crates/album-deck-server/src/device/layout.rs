//! Key assignment for the control surface.
//!
//! The last three keys are now-playing, previous and next; every key before
//! them is an album slot in a wrapping carousel over the catalog.

use std::time::{Duration, Instant};

use album_deck_types::PlayerState;

use super::{ControlGlyph, KeyFace, RenderFrame};
use crate::library::{Album, Catalog};

const CONTROL_KEYS: usize = 3;
/// Six-key Mini, until a device reports otherwise.
pub const DEFAULT_KEY_COUNT: usize = 6;

/// Target of a key press under the current layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    PlayAlbum { album_id: u32 },
    NowPlaying,
    Previous,
    Next,
    Blank,
}

#[derive(Debug, Clone)]
pub struct DeviceLayout {
    key_count: usize,
    offset: usize,
    last_interaction: Instant,
    reset_after: Duration,
}

impl DeviceLayout {
    pub fn new(key_count: usize, reset_after: Duration) -> Self {
        Self {
            key_count,
            offset: 0,
            last_interaction: Instant::now(),
            reset_after,
        }
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn set_key_count(&mut self, key_count: usize) {
        self.key_count = key_count;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn album_slots(&self) -> usize {
        self.key_count.saturating_sub(CONTROL_KEYS)
    }

    /// Resolve one key against `catalog`.
    pub fn action_for(&self, key: usize, catalog: &Catalog) -> KeyAction {
        if key >= self.key_count || self.key_count < CONTROL_KEYS {
            return KeyAction::Blank;
        }
        let slots = self.album_slots();
        if key < slots {
            if catalog.is_empty() {
                return KeyAction::Blank;
            }
            let index = (self.offset + key) % catalog.len();
            return match catalog.get(index) {
                Some(album) => KeyAction::PlayAlbum { album_id: album.id },
                None => KeyAction::Blank,
            };
        }
        match key - slots {
            0 => KeyAction::NowPlaying,
            1 => KeyAction::Previous,
            _ => KeyAction::Next,
        }
    }

    /// Button id to action for every key.
    pub fn mapping(&self, catalog: &Catalog) -> Vec<KeyAction> {
        (0..self.key_count)
            .map(|key| self.action_for(key, catalog))
            .collect()
    }

    /// Move the carousel by `delta` albums, wrapping around.
    pub fn page(&mut self, delta: isize, album_count: usize) {
        if album_count == 0 {
            self.offset = 0;
            return;
        }
        let count = album_count as isize;
        self.offset = (self.offset as isize + delta).rem_euclid(count) as usize;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_interaction = now;
    }

    /// Return the carousel to the first album after an idle period.
    ///
    /// Returns `true` when the offset changed.
    pub fn reset_if_idle(&mut self, now: Instant) -> bool {
        if self.offset != 0 && now.duration_since(self.last_interaction) >= self.reset_after {
            self.offset = 0;
            return true;
        }
        false
    }

    /// Keep the offset in range after the catalog shrinks.
    pub fn clamp(&mut self, album_count: usize) {
        if self.offset >= album_count.max(1) {
            self.offset = 0;
        }
    }

    /// Faces for the current layout and session.
    pub fn frame(
        &self,
        catalog: &Catalog,
        state: PlayerState,
        album: Option<&Album>,
    ) -> RenderFrame {
        let track_mode = state.is_playing();
        let faces = self
            .mapping(catalog)
            .into_iter()
            .map(|action| match action {
                KeyAction::Blank => KeyFace::Blank,
                KeyAction::PlayAlbum { album_id } => KeyFace::Album {
                    album_id,
                    artwork: catalog
                        .find(album_id)
                        .and_then(|(_, a)| a.display_artwork().cloned()),
                },
                KeyAction::NowPlaying => KeyFace::NowPlaying {
                    album_id: album.map(|a| a.id),
                    artwork: album.and_then(|a| a.display_artwork().cloned()),
                    state,
                },
                KeyAction::Previous if track_mode => KeyFace::Control(ControlGlyph::PreviousTrack),
                KeyAction::Previous => KeyFace::Control(ControlGlyph::CarouselBack),
                KeyAction::Next if track_mode => KeyFace::Control(ControlGlyph::NextTrack),
                KeyAction::Next => KeyFace::Control(ControlGlyph::CarouselForward),
            })
            .collect();
        RenderFrame { faces }
    }
}
