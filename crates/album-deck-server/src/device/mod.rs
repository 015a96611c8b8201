//! Physical control surface support.
//!
//! The bridge thread owns the hardware. The coordinator owns the key layout
//! and hands the bridge complete [`RenderFrame`]s through a [`DeviceLink`].

pub mod bridge;
pub mod layout;
pub mod render;
#[cfg(feature = "streamdeck")]
pub mod streamdeck;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use album_deck_types::PlayerState;
use image::DynamicImage;

use crate::library::Artwork;

pub use bridge::spawn_device_bridge;
pub use layout::{DeviceLayout, KeyAction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No supported surface is attached.
    NotFound,
    Io(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound => f.write_str("no control surface found"),
            DeviceError::Io(msg) => write!(f, "device i/o error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// An open connection to a keypad with image-capable keys.
pub trait ControlSurface {
    fn key_count(&self) -> usize;
    fn set_brightness(&mut self, percent: u8) -> Result<(), DeviceError>;
    fn set_key_image(&mut self, key: u8, image: &DynamicImage) -> Result<(), DeviceError>;
    /// Push buffered key images to the panel.
    fn flush(&mut self) -> Result<(), DeviceError>;
    /// Wait up to `timeout` for input; `Some` carries the pressed state of every key.
    fn read_buttons(&mut self, timeout: Duration) -> Result<Option<Vec<bool>>, DeviceError>;
    /// Blank the panel before disconnecting.
    fn reset(&mut self) -> Result<(), DeviceError>;
}

/// Opens surfaces; called repeatedly by the bridge's reconnect loop.
pub trait SurfaceConnector: Send {
    fn connect(&mut self) -> Result<Box<dyn ControlSurface>, DeviceError>;
}

/// Connector used when hardware support is compiled out or disabled.
pub struct NullConnector;

impl SurfaceConnector for NullConnector {
    fn connect(&mut self) -> Result<Box<dyn ControlSurface>, DeviceError> {
        Err(DeviceError::NotFound)
    }
}

/// Transport arrows and carousel chevrons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlGlyph {
    PreviousTrack,
    NextTrack,
    CarouselBack,
    CarouselForward,
}

/// What one key should display.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyFace {
    Blank,
    Album {
        album_id: u32,
        artwork: Option<Artwork>,
    },
    NowPlaying {
        album_id: Option<u32>,
        artwork: Option<Artwork>,
        state: PlayerState,
    },
    Control(ControlGlyph),
}

/// Faces for every key, indexed by key id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderFrame {
    pub faces: Vec<KeyFace>,
}

/// Shared state between the coordinator and the bridge thread.
#[derive(Clone, Default)]
pub struct DeviceLink {
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<RenderFrame>>>,
}

impl DeviceLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record connectivity; returns `true` when the value changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::Relaxed) != connected
    }

    /// Replace any not-yet-rendered frame with `frame`.
    pub fn publish_frame(&self, frame: RenderFrame) {
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(frame);
    }

    pub fn take_frame(&self) -> Option<RenderFrame> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
