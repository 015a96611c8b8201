//! Commands and the bounded queue feeding the coordinator.
//!
//! Every control surface (HTTP, device, engine callbacks, library refresh)
//! submits through [`CommandSender`]; exactly one worker drains the receiver.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use actix_web::HttpResponse;
use actix_web::http::header;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::engine::LoadHandle;
use crate::library::{Album, Catalog};

/// Press duration class reported by the device bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Press {
    Short,
    /// Fired once at the hold threshold, then again per repeat interval.
    Long,
}

/// One discrete intent for the session state machine.
#[derive(Clone, Debug)]
pub enum Command {
    /// Start track 0 of the album validated at submission time.
    PlayAlbum { index: usize, album: Arc<Album> },
    Stop,
    Pause,
    Resume,
    Next,
    Previous,
    /// The engine finished the track loaded under `handle`.
    TrackEnded { handle: LoadHandle },
    /// The engine failed to load or play the track under `handle`.
    EngineError { handle: LoadHandle, message: String },
    DeviceButton { key: u8, press: Press },
    /// A control surface with `key_count` keys was (re)connected.
    DeviceAttached { key_count: usize },
    /// A new catalog snapshot was published.
    CatalogUpdated,
    /// Stop playback and exit the worker.
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::PlayAlbum { .. } => "play_album",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Next => "next",
            Command::Previous => "previous",
            Command::TrackEnded { .. } => "track_ended",
            Command::EngineError { .. } => "engine_error",
            Command::DeviceButton { .. } => "device_button",
            Command::DeviceAttached { .. } => "device_attached",
            Command::CatalogUpdated => "catalog_updated",
            Command::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Http,
    Device,
    Engine,
    Library,
    /// Process lifecycle, e.g. Ctrl+C.
    System,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::Http => "http",
            Origin::Device => "device",
            Origin::Engine => "engine",
            Origin::Library => "library",
            Origin::System => "system",
        };
        f.write_str(name)
    }
}

/// A queued command plus ordering metadata. The metadata never drives transitions.
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub origin: Origin,
    /// Submission ticket, strictly increasing per sender family.
    pub seq: u64,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Album index outside the current catalog; nothing was queued.
    Validation { index: usize, len: usize },
    /// The queue is at capacity; nothing was queued.
    Busy,
    /// The coordinator worker is gone.
    Closed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Validation { index, len } => {
                write!(f, "album index {index} out of range (catalog has {len} albums)")
            }
            CommandError::Busy => f.write_str("command queue full; retry shortly"),
            CommandError::Closed => f.write_str("playback coordinator offline"),
        }
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    pub(crate) fn into_response(self) -> HttpResponse {
        let message = self.to_string();
        match self {
            CommandError::Validation { .. } => HttpResponse::BadRequest().body(message),
            CommandError::Busy => HttpResponse::ServiceUnavailable()
                .insert_header((header::RETRY_AFTER, "1"))
                .body(message),
            CommandError::Closed => HttpResponse::InternalServerError().body(message),
        }
    }
}

/// Cloneable submission handle for the coordinator queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Envelope>,
    seq: Arc<AtomicU64>,
}

/// Create the bounded queue shared by all command sources.
pub fn command_queue(capacity: usize) -> (CommandSender, Receiver<Envelope>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        CommandSender {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl CommandSender {
    fn envelope(&self, command: Command, origin: Origin) -> Envelope {
        Envelope {
            command,
            origin,
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            enqueued_at: Instant::now(),
        }
    }

    /// Enqueue without blocking; a full queue is reported as [`CommandError::Busy`].
    pub fn submit(&self, command: Command, origin: Origin) -> Result<u64, CommandError> {
        let envelope = self.envelope(command, origin);
        let seq = envelope.seq;
        match self.tx.try_send(envelope) {
            Ok(()) => Ok(seq),
            Err(TrySendError::Full(_)) => Err(CommandError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(CommandError::Closed),
        }
    }

    /// Enqueue, waiting up to `timeout` for room.
    ///
    /// Used for engine lifecycle events, which must not be lost to a momentary burst.
    pub fn submit_wait(
        &self,
        command: Command,
        origin: Origin,
        timeout: Duration,
    ) -> Result<u64, CommandError> {
        let envelope = self.envelope(command, origin);
        let seq = envelope.seq;
        match self.tx.send_timeout(envelope, timeout) {
            Ok(()) => Ok(seq),
            Err(SendTimeoutError::Timeout(_)) => Err(CommandError::Busy),
            Err(SendTimeoutError::Disconnected(_)) => Err(CommandError::Closed),
        }
    }

    /// Validate `index` against `catalog` and enqueue a play request for it.
    ///
    /// Returns the album that will be played.
    pub fn submit_play(
        &self,
        catalog: &Catalog,
        index: usize,
        origin: Origin,
    ) -> Result<Arc<Album>, CommandError> {
        let album = catalog
            .get(index)
            .cloned()
            .ok_or(CommandError::Validation {
                index,
                len: catalog.len(),
            })?;
        self.submit(
            Command::PlayAlbum {
                index,
                album: album.clone(),
            },
            origin,
        )?;
        Ok(album)
    }
}
