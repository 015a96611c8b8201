//! Elgato Stream Deck surfaces over HID.

use std::time::Duration;

use elgato_streamdeck::{StreamDeck, StreamDeckInput, list_devices, new_hidapi};
use image::DynamicImage;

use super::{ControlSurface, DeviceError, SurfaceConnector};

/// Connects to the first Stream Deck found on the bus.
pub struct StreamDeckConnector;

impl SurfaceConnector for StreamDeckConnector {
    fn connect(&mut self) -> Result<Box<dyn ControlSurface>, DeviceError> {
        // The HID context is only needed while opening the device.
        let hid = new_hidapi().map_err(|e| DeviceError::Io(format!("{e:?}")))?;
        let (kind, serial) = list_devices(&hid)
            .into_iter()
            .next()
            .ok_or(DeviceError::NotFound)?;
        let deck = StreamDeck::connect(&hid, kind, &serial)
            .map_err(|e| DeviceError::Io(format!("{e:?}")))?;
        tracing::info!(serial = %serial, kind = ?kind, "opened stream deck");
        Ok(Box::new(StreamDeckSurface {
            deck,
            key_count: usize::from(kind.key_count()),
        }))
    }
}

struct StreamDeckSurface {
    deck: StreamDeck,
    key_count: usize,
}

fn io_err<E: std::fmt::Debug>(e: E) -> DeviceError {
    DeviceError::Io(format!("{e:?}"))
}

impl ControlSurface for StreamDeckSurface {
    fn key_count(&self) -> usize {
        self.key_count
    }

    fn set_brightness(&mut self, percent: u8) -> Result<(), DeviceError> {
        self.deck.set_brightness(percent).map_err(io_err)
    }

    fn set_key_image(&mut self, key: u8, image: &DynamicImage) -> Result<(), DeviceError> {
        self.deck.set_button_image(key, image.clone()).map_err(io_err)
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.deck.flush().map_err(io_err)
    }

    fn read_buttons(&mut self, timeout: Duration) -> Result<Option<Vec<bool>>, DeviceError> {
        match self.deck.read_input(Some(timeout)).map_err(io_err)? {
            StreamDeckInput::ButtonStateChange(states) => Ok(Some(states)),
            _ => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.deck.reset().map_err(io_err)
    }
}
