//! Playback engine abstraction used by the coordinator.
//!
//! Implementations own the audio output. They report lifecycle events only by
//! submitting commands to the coordinator queue, tagged with the [`LoadHandle`]
//! that was current when the event happened.

use std::fmt;
use std::path::Path;

use crate::library::Album;

/// Identifies one `load` call; events carrying an older handle are stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoadHandle(pub u64);

impl fmt::Display for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine worker is not running.
    Offline,
    Load(String),
    Playback(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Offline => f.write_str("playback engine offline"),
            EngineError::Load(msg) => write!(f, "load failed: {msg}"),
            EngineError::Playback(msg) => write!(f, "playback failed: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub trait PlaybackEngine: Send {
    /// Replace whatever is loaded with `path`, held paused.
    ///
    /// Decode failures are reported later as an engine-error command, not here.
    fn load(&mut self, path: &Path) -> Result<LoadHandle, EngineError>;
    /// Start the freshly loaded track.
    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self) -> Result<(), EngineError>;
    fn resume(&mut self) -> Result<(), EngineError>;
    /// Stop and unload.
    fn stop(&mut self) -> Result<(), EngineError>;
}

/// Load track `index` of `album`, starting it unless `paused`.
pub fn start_track(
    engine: &mut dyn PlaybackEngine,
    album: &Album,
    index: usize,
    paused: bool,
) -> Result<LoadHandle, EngineError> {
    let track = album
        .tracks
        .get(index)
        .ok_or_else(|| EngineError::Load(format!("album {} has no track {index}", album.id)))?;
    let handle = engine.load(&track.path)?;
    if !paused {
        engine.play()?;
    }
    Ok(handle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    /// The neighbouring track is now loaded.
    Loaded { index: usize, handle: LoadHandle },
    /// Moved past the last track; nothing was loaded.
    PastEnd,
    /// Already at the first track; nothing changed.
    AtStart,
}

/// Move `delta` tracks from `index` within `album`, keeping the paused mode.
pub fn skip(
    engine: &mut dyn PlaybackEngine,
    album: &Album,
    index: usize,
    delta: isize,
    paused: bool,
) -> Result<SkipOutcome, EngineError> {
    let target = index as isize + delta;
    if target < 0 {
        return Ok(SkipOutcome::AtStart);
    }
    let target = target as usize;
    if target >= album.tracks.len() {
        return Ok(SkipOutcome::PastEnd);
    }
    let handle = start_track(engine, album, target, paused)?;
    Ok(SkipOutcome::Loaded {
        index: target,
        handle,
    })
}
