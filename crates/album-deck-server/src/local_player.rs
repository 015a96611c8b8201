//! Local playback worker.
//!
//! Uses `rodio` to decode and play files on the host machine. The output
//! stream and sinks live on one dedicated thread; the coordinator talks to it
//! through [`LocalPlayer`] and hears back only through the command queue.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};

use crate::command::{Command, CommandSender, Origin};
use crate::engine::{EngineError, LoadHandle, PlaybackEngine};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

enum PlayerCommand {
    Load { handle: LoadHandle, path: PathBuf },
    Play,
    Pause,
    Resume,
    Stop,
    Quit,
}

/// Best-effort playback position shared with status readers.
#[derive(Clone, Default)]
pub struct PositionProbe {
    elapsed_ms: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
}

impl PositionProbe {
    pub fn elapsed_ms(&self) -> Option<u64> {
        if self.active.load(Ordering::Relaxed) {
            Some(self.elapsed_ms.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn set(&self, ms: u64) {
        self.elapsed_ms.store(ms, Ordering::Relaxed);
        self.active.store(true, Ordering::Relaxed);
    }

    fn clear(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.elapsed_ms.store(0, Ordering::Relaxed);
    }
}

/// Handle for sending playback commands to the local player thread.
pub struct LocalPlayer {
    cmd_tx: Sender<PlayerCommand>,
    next_handle: u64,
    position: PositionProbe,
}

impl LocalPlayer {
    /// Spawn the player thread. Lifecycle events are submitted to `events`.
    pub fn spawn(events: CommandSender) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let position = PositionProbe::default();
        let thread_position = position.clone();
        std::thread::Builder::new()
            .name("local-player".to_string())
            .spawn(move || player_thread_main(cmd_rx, events, thread_position))
            .context("spawn local player thread")?;
        Ok(Self {
            cmd_tx,
            next_handle: 0,
            position,
        })
    }

    pub fn position(&self) -> PositionProbe {
        self.position.clone()
    }

    fn send(&self, cmd: PlayerCommand) -> Result<(), EngineError> {
        self.cmd_tx.send(cmd).map_err(|_| EngineError::Offline)
    }
}

impl Drop for LocalPlayer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Quit);
    }
}

impl PlaybackEngine for LocalPlayer {
    fn load(&mut self, path: &Path) -> Result<LoadHandle, EngineError> {
        self.next_handle += 1;
        let handle = LoadHandle(self.next_handle);
        self.send(PlayerCommand::Load {
            handle,
            path: path.to_path_buf(),
        })?;
        Ok(handle)
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.send(PlayerCommand::Play)
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.send(PlayerCommand::Pause)
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        self.send(PlayerCommand::Resume)
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.send(PlayerCommand::Stop)
    }
}

struct LoadedTrack {
    handle: LoadHandle,
    sink: Sink,
}

/// Main command loop for the local player thread.
fn player_thread_main(cmd_rx: Receiver<PlayerCommand>, events: CommandSender, position: PositionProbe) {
    // Opened lazily so a host without an output device still reports per-load errors.
    let mut output: Option<(OutputStream, OutputStreamHandle)> = None;
    let mut current: Option<LoadedTrack> = None;

    loop {
        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(PlayerCommand::Load { handle, path }) => {
                unload(&mut current, &position);
                match open_track(&mut output, &path) {
                    Ok(sink) => {
                        tracing::debug!(handle = %handle, path = %path.display(), "track loaded");
                        position.set(0);
                        current = Some(LoadedTrack { handle, sink });
                    }
                    Err(e) => {
                        tracing::warn!(handle = %handle, path = %path.display(), "local playback error: {e:#}");
                        report(
                            &events,
                            Command::EngineError {
                                handle,
                                message: format!("{e:#}"),
                            },
                        );
                    }
                }
            }
            Ok(PlayerCommand::Play) | Ok(PlayerCommand::Resume) => {
                if let Some(track) = current.as_ref() {
                    track.sink.play();
                }
            }
            Ok(PlayerCommand::Pause) => {
                if let Some(track) = current.as_ref() {
                    track.sink.pause();
                }
            }
            Ok(PlayerCommand::Stop) => unload(&mut current, &position),
            Ok(PlayerCommand::Quit) | Err(RecvTimeoutError::Disconnected) => {
                unload(&mut current, &position);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let finished = match current.as_ref() {
            Some(track) if track.sink.empty() => Some(track.handle),
            Some(track) => {
                position.set(track.sink.get_pos().as_millis() as u64);
                None
            }
            None => None,
        };
        if let Some(handle) = finished {
            unload(&mut current, &position);
            tracing::debug!(handle = %handle, "track ended");
            report(&events, Command::TrackEnded { handle });
        }
    }
    tracing::info!("local player stopped");
}

fn unload(current: &mut Option<LoadedTrack>, position: &PositionProbe) {
    if let Some(track) = current.take() {
        track.sink.stop();
    }
    position.clear();
}

/// Decode `path` into a new paused sink on the shared output stream.
fn open_track(output: &mut Option<(OutputStream, OutputStreamHandle)>, path: &Path) -> Result<Sink> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let source = Decoder::new(BufReader::new(file)).with_context(|| format!("decode {:?}", path))?;
    if output.is_none() {
        let opened = OutputStream::try_default().context("open default audio output")?;
        *output = Some(opened);
    }
    let Some((_, handle)) = output.as_ref() else {
        return Err(anyhow::anyhow!("audio output unavailable"));
    };
    let sink = Sink::try_new(handle).context("create sink")?;
    sink.pause();
    sink.append(source);
    Ok(sink)
}

fn report(events: &CommandSender, command: Command) {
    let name = command.name();
    if let Err(e) = events.submit_wait(command, Origin::Engine, EVENT_SUBMIT_TIMEOUT) {
        tracing::error!(command = name, error = %e, "failed to deliver engine event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command_queue;

    #[test]
    fn unreadable_file_is_reported_as_engine_error() {
        let (events, rx) = command_queue(4);
        let mut player = LocalPlayer::spawn(events).unwrap();
        let handle = player
            .load(Path::new("/nonexistent/album-deck/missing.flac"))
            .unwrap();

        let envelope = rx.recv_timeout(Duration::from_secs(5)).expect("engine event");
        assert_eq!(envelope.origin, Origin::Engine);
        match envelope.command {
            Command::EngineError { handle: got, message } => {
                assert_eq!(got, handle);
                assert!(message.contains("missing.flac"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(player.position().elapsed_ms().is_none());
    }

    #[test]
    fn handles_increase_per_load() {
        let (events, _rx) = command_queue(4);
        let mut player = LocalPlayer::spawn(events).unwrap();
        let first = player.load(Path::new("/nonexistent/a.flac")).unwrap();
        let second = player.load(Path::new("/nonexistent/b.flac")).unwrap();
        assert!(second.0 > first.0);
    }

    #[test]
    fn position_probe_reports_only_while_active() {
        let probe = PositionProbe::default();
        assert!(probe.elapsed_ms().is_none());
        probe.set(1200);
        assert_eq!(probe.elapsed_ms(), Some(1200));
        probe.clear();
        assert!(probe.elapsed_ms().is_none());
    }
}
