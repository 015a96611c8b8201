//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_BIND: &str = "0.0.0.0:5000";
const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Media library root directory (defaults to `~/Music`).
    pub media_dir: Option<String>,
    /// Command queue capacity before submissions are rejected as busy.
    pub queue_capacity: Option<usize>,
    /// Periodic library rescan interval; unset disables it.
    pub rescan_interval_secs: Option<u64>,
    /// Control surface settings.
    pub device: Option<DeviceConfig>,
    /// MusicBrainz enrichment settings.
    pub musicbrainz: Option<MusicBrainzConfig>,
    /// Hand-assembled albums merged into the catalog.
    pub playlists: Option<Vec<PlaylistConfig>>,
}

/// Control surface config from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceConfig {
    pub enabled: Option<bool>,
    /// Panel brightness percentage.
    pub brightness: Option<u8>,
    /// Hold time before a press counts as long.
    pub long_press_ms: Option<u64>,
    /// Repeat interval for held paging keys.
    pub repeat_ms: Option<u64>,
    /// Idle time before the carousel returns to the first album.
    pub carousel_reset_secs: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    /// Key image edge length in pixels.
    pub key_size: Option<u32>,
}

/// MusicBrainz configuration.
#[derive(Debug, Default, Deserialize)]
pub struct MusicBrainzConfig {
    /// Enable MusicBrainz lookups after scans.
    pub enabled: Option<bool>,
    /// User-Agent string required by MusicBrainz (include contact info).
    pub user_agent: Option<String>,
    /// Optional base URL override (defaults to https://musicbrainz.org/ws/2).
    pub base_url: Option<String>,
    /// Minimum delay between requests in milliseconds (default: 1000).
    pub rate_limit_ms: Option<u64>,
    /// Fetch front covers from the Cover Art Archive (default: true).
    pub cover_art: Option<bool>,
}

/// Playlist album from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistConfig {
    pub title: String,
    pub artist: Option<String>,
    /// Track file paths in play order.
    pub tracks: Vec<String>,
    /// Optional artwork image path.
    pub artwork: Option<String>,
}

/// Resolved control surface settings.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub enabled: bool,
    pub brightness: u8,
    pub long_press: Duration,
    pub repeat: Duration,
    pub carousel_reset: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub key_size: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            brightness: 70,
            long_press: Duration::from_millis(1000),
            repeat: Duration::from_millis(400),
            carousel_reset: Duration::from_secs(30),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            key_size: 72,
        }
    }
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Resolve the bind address, falling back to the default port.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<SocketAddr> {
    let raw = cfg.bind.as_deref().unwrap_or(DEFAULT_BIND);
    raw.parse()
        .with_context(|| format!("parse bind address {raw}"))
}

/// Resolve the media directory, defaulting to `~/Music`.
pub fn media_dir_from_config(cfg: &ServerConfig) -> Result<PathBuf> {
    if let Some(dir) = cfg.media_dir.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        return Ok(expand_home(dir));
    }
    let home = std::env::var_os("HOME")
        .ok_or_else(|| anyhow::anyhow!("media_dir not configured and HOME is unset"))?;
    Ok(PathBuf::from(home).join("Music"))
}

pub fn queue_capacity_from_config(cfg: &ServerConfig) -> usize {
    cfg.queue_capacity
        .filter(|cap| *cap > 0)
        .unwrap_or(DEFAULT_QUEUE_CAPACITY)
}

pub fn rescan_interval_from_config(cfg: &ServerConfig) -> Option<Duration> {
    cfg.rescan_interval_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Merge device overrides onto the defaults.
pub fn device_settings_from_config(cfg: &ServerConfig) -> DeviceSettings {
    let mut settings = DeviceSettings::default();
    let Some(device) = cfg.device.as_ref() else {
        return settings;
    };
    if let Some(enabled) = device.enabled {
        settings.enabled = enabled;
    }
    if let Some(brightness) = device.brightness {
        settings.brightness = brightness.min(100);
    }
    if let Some(ms) = device.long_press_ms {
        settings.long_press = Duration::from_millis(ms);
    }
    if let Some(ms) = device.repeat_ms.filter(|ms| *ms > 0) {
        settings.repeat = Duration::from_millis(ms);
    }
    if let Some(secs) = device.carousel_reset_secs {
        settings.carousel_reset = Duration::from_secs(secs);
    }
    if let Some(ms) = device.reconnect_initial_ms.filter(|ms| *ms > 0) {
        settings.reconnect_initial = Duration::from_millis(ms);
    }
    if let Some(ms) = device.reconnect_max_ms {
        settings.reconnect_max = Duration::from_millis(ms).max(settings.reconnect_initial);
    }
    if let Some(size) = device.key_size.filter(|size| *size > 0) {
        settings.key_size = size;
    }
    settings
}

pub fn playlists_from_config(cfg: &ServerConfig) -> Vec<PlaylistConfig> {
    cfg.playlists.clone().unwrap_or_default()
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}
