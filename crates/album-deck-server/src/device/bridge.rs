//! Device bridge worker.
//!
//! Keeps a control surface connected, turns key transitions into commands,
//! and pushes the coordinator's latest frame to the panel.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::render::render_face;
use super::{ControlSurface, DeviceError, DeviceLink, KeyFace, RenderFrame, SurfaceConnector};
use crate::command::{Command, CommandError, CommandSender, Origin, Press};
use crate::config::DeviceSettings;

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Doubling reconnect delay, capped at `max`.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone, Copy)]
struct HeldKey {
    since: Instant,
    long_fired: bool,
    next_repeat: Instant,
}

/// Edge and hold detection over raw key states.
#[derive(Debug)]
pub(crate) struct PressTracker {
    held: Vec<Option<HeldKey>>,
    long_press: Duration,
    repeat: Duration,
}

impl PressTracker {
    pub(crate) fn new(key_count: usize, long_press: Duration, repeat: Duration) -> Self {
        Self {
            held: vec![None; key_count],
            long_press,
            repeat,
        }
    }

    /// Apply a full key-state report. Releases without a long press yield `Short`.
    pub(crate) fn update(&mut self, states: &[bool], now: Instant) -> Vec<(u8, Press)> {
        let mut out = Vec::new();
        for (key, pressed) in states.iter().copied().enumerate() {
            let Some(slot) = self.held.get_mut(key) else {
                break;
            };
            match (slot.as_ref(), pressed) {
                (None, true) => {
                    *slot = Some(HeldKey {
                        since: now,
                        long_fired: false,
                        next_repeat: now + self.long_press,
                    });
                }
                (Some(held), false) => {
                    if !held.long_fired {
                        out.push((key as u8, Press::Short));
                    }
                    *slot = None;
                }
                _ => {}
            }
        }
        out
    }

    /// Fire long presses and their repeats for keys still held at `now`.
    pub(crate) fn tick(&mut self, now: Instant) -> Vec<(u8, Press)> {
        let mut out = Vec::new();
        for (key, slot) in self.held.iter_mut().enumerate() {
            let Some(held) = slot.as_mut() else {
                continue;
            };
            if now.duration_since(held.since) < self.long_press || now < held.next_repeat {
                continue;
            }
            held.long_fired = true;
            held.next_repeat = now + self.repeat;
            out.push((key as u8, Press::Long));
        }
        out
    }
}

/// Spawn the bridge thread. It runs until [`DeviceLink::request_shutdown`].
pub fn spawn_device_bridge(
    connector: Box<dyn SurfaceConnector>,
    link: DeviceLink,
    commands: CommandSender,
    settings: DeviceSettings,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("device-bridge".to_string())
        .spawn(move || bridge_main(connector, link, commands, settings))
        .context("spawn device bridge thread")
}

fn bridge_main(
    mut connector: Box<dyn SurfaceConnector>,
    link: DeviceLink,
    commands: CommandSender,
    settings: DeviceSettings,
) {
    let mut backoff = Backoff::new(settings.reconnect_initial, settings.reconnect_max);
    let mut latest = RenderFrame::default();
    let mut reported_missing = false;

    while !link.is_shutting_down() {
        match connector.connect() {
            Ok(mut surface) => {
                backoff.reset();
                reported_missing = false;
                let key_count = surface.key_count();
                if link.set_connected(true) {
                    tracing::info!(keys = key_count, "control surface connected");
                }
                // The coordinator answers with a frame sized for this panel.
                if let Err(e) = commands.submit(
                    Command::DeviceAttached { key_count },
                    Origin::Device,
                ) {
                    tracing::warn!(error = %e, "failed to announce control surface");
                }
                let result = drive(surface.as_mut(), &link, &commands, &settings, &mut latest);
                if link.set_connected(false) {
                    tracing::warn!("control surface disconnected");
                }
                match result {
                    Ok(()) => break,
                    Err(e) => tracing::warn!(error = %e, "control surface lost; reconnecting"),
                }
            }
            Err(DeviceError::NotFound) => {
                if !reported_missing {
                    tracing::info!("no control surface found; will keep looking");
                    reported_missing = true;
                }
            }
            Err(e) => tracing::warn!(error = %e, "control surface connect failed"),
        }
        sleep_unless_shutdown(&link, backoff.next_delay());
    }
    tracing::info!("device bridge stopped");
}

fn sleep_unless_shutdown(link: &DeviceLink, total: Duration) {
    let deadline = Instant::now() + total;
    while !link.is_shutting_down() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

/// Serve one connection until it fails (`Err`) or shutdown is requested (`Ok`).
fn drive(
    surface: &mut dyn ControlSurface,
    link: &DeviceLink,
    commands: &CommandSender,
    settings: &DeviceSettings,
    latest: &mut RenderFrame,
) -> Result<(), DeviceError> {
    surface.set_brightness(settings.brightness)?;
    let key_count = surface.key_count();
    let mut shown: Vec<Option<KeyFace>> = vec![None; key_count];
    let mut presses = PressTracker::new(key_count, settings.long_press, settings.repeat);

    loop {
        if link.is_shutting_down() {
            if let Err(e) = surface.reset() {
                tracing::debug!(error = %e, "control surface reset failed");
            }
            return Ok(());
        }
        if let Some(frame) = link.take_frame() {
            *latest = frame;
        }
        render_changes(surface, latest, &mut shown, settings.key_size);

        let now = Instant::now();
        let mut events = match surface.read_buttons(READ_TIMEOUT)? {
            Some(states) => presses.update(&states, now),
            None => Vec::new(),
        };
        events.extend(presses.tick(Instant::now()));
        for (key, press) in events {
            submit_press(commands, key, press);
        }
    }
}

fn submit_press(commands: &CommandSender, key: u8, press: Press) {
    tracing::debug!(key, ?press, "device key press");
    match commands.submit(Command::DeviceButton { key, press }, Origin::Device) {
        Ok(_) => {}
        Err(CommandError::Busy) => {
            tracing::warn!(key, "command queue full; dropping device press");
        }
        Err(e) => tracing::warn!(key, error = %e, "device press rejected"),
    }
}

/// Send only the keys whose face differs from what the panel shows.
fn render_changes(
    surface: &mut dyn ControlSurface,
    frame: &RenderFrame,
    shown: &mut [Option<KeyFace>],
    size: u32,
) {
    let mut dirty = false;
    for (key, face) in frame.faces.iter().enumerate() {
        let Some(current) = shown.get_mut(key) else {
            break;
        };
        if current.as_ref() == Some(face) {
            continue;
        }
        let image = render_face(face, size);
        match surface.set_key_image(key as u8, &image) {
            Ok(()) => {
                *current = Some(face.clone());
                dirty = true;
            }
            Err(e) => tracing::warn!(key, error = %e, "key render failed"),
        }
    }
    if dirty {
        if let Err(e) = surface.flush() {
            tracing::warn!(error = %e, "panel flush failed");
            shown.iter_mut().for_each(|face| *face = None);
        }
    }
}
