//! Library scanning and the published album catalog.
//!
//! Walks the media root, probes tags, and builds an ordered, immutable
//! snapshot of albums that readers share without locking.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, StandardVisualKey};
use symphonia::core::probe::Hint;

use album_deck_types::{AlbumEnrichment, AlbumInfo, TrackInfo};

use crate::config::PlaylistConfig;

const AUDIO_EXTENSIONS: [&str; 9] = ["mp3", "aiff", "aif", "ogg", "mp4", "aac", "m4a", "flac", "wav"];
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const MAX_COVER_ART_BYTES: usize = 5_000_000;
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Encoded image bytes with their MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artwork {
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub index: usize,
    pub title: String,
    pub duration_secs: f64,
    pub path: PathBuf,
}

impl Track {
    pub fn to_info(&self) -> TrackInfo {
        TrackInfo {
            index: self.index,
            title: self.title.clone(),
            duration: self.duration_secs,
        }
    }
}

/// Remote metadata merged in by the enricher.
#[derive(Clone, Debug, PartialEq)]
pub struct Enrichment {
    pub mbid: String,
    pub year: Option<i32>,
    pub cover: Option<Artwork>,
}

/// One playable album. Immutable once published in a [`Catalog`].
#[derive(Clone, Debug, PartialEq)]
pub struct Album {
    pub id: u32,
    pub title: String,
    pub artist: String,
    pub tracks: Vec<Track>,
    pub artwork: Option<Artwork>,
    pub enrichment: Option<Enrichment>,
}

impl Album {
    /// Normalized `artist|title` key used to dedupe remote lookups.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", normalize(&self.artist), normalize(&self.title))
    }

    /// Copy of this album carrying `enrichment`.
    pub fn with_enrichment(&self, enrichment: Enrichment) -> Album {
        Album {
            enrichment: Some(enrichment),
            ..self.clone()
        }
    }

    /// Artwork to show, preferring an enriched cover over local art.
    pub fn display_artwork(&self) -> Option<&Artwork> {
        self.enrichment
            .as_ref()
            .and_then(|e| e.cover.as_ref())
            .or(self.artwork.as_ref())
    }

    pub fn to_info(&self) -> AlbumInfo {
        AlbumInfo {
            id: self.id,
            title: self.title.clone(),
            artist: self.artist.clone(),
            tracks: self.tracks.iter().map(Track::to_info).collect(),
            has_artwork: self.display_artwork().is_some(),
            enrichment: self.enrichment.as_ref().map(|e| AlbumEnrichment {
                mbid: e.mbid.clone(),
                year: e.year,
            }),
        }
    }
}

fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Ordered album snapshot: artist, then title, ties broken by id.
#[derive(Debug, Default)]
pub struct Catalog {
    albums: Vec<Arc<Album>>,
    generation: u64,
}

impl Catalog {
    pub fn new(albums: Vec<Arc<Album>>, generation: u64) -> Self {
        let mut albums = albums;
        albums.sort_by(|a, b| {
            a.artist
                .to_lowercase()
                .cmp(&b.artist.to_lowercase())
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { albums, generation }
    }

    pub fn albums(&self) -> &[Arc<Album>] {
        &self.albums
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Album>> {
        self.albums.get(index)
    }

    /// Locate an album by id, returning its current position.
    pub fn find(&self, id: u32) -> Option<(usize, &Arc<Album>)> {
        self.albums
            .iter()
            .enumerate()
            .find(|(_, album)| album.id == id)
    }

    pub fn len(&self) -> usize {
        self.albums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }

    /// Bumped every time a new catalog is published.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holder for the current catalog snapshot; writers swap whole snapshots.
pub struct CatalogStore {
    inner: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    pub fn new(albums: Vec<Album>) -> Self {
        let albums = albums.into_iter().map(Arc::new).collect();
        Self {
            inner: RwLock::new(Arc::new(Catalog::new(albums, 1))),
        }
    }

    /// Current snapshot. Cheap; never blocks on a rescan in progress.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the catalog with a freshly scanned album set.
    pub fn publish(&self, albums: Vec<Album>) -> Arc<Catalog> {
        let albums: Vec<Arc<Album>> = albums.into_iter().map(Arc::new).collect();
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(Catalog::new(albums, guard.generation + 1));
        *guard = next.clone();
        next
    }

    /// Rewrite one album from its current record under the write lock.
    ///
    /// `update` sees the latest published copy, so a concurrent rescan is never
    /// reverted. Returns `false` when the album is gone or `update` declines.
    pub fn update_album(&self, id: u32, update: impl FnOnce(&Album) -> Option<Album>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(next) = guard.find(id).and_then(|(_, current)| update(current.as_ref())) else {
            return false;
        };
        let next = Arc::new(next);
        let albums = guard
            .albums
            .iter()
            .map(|existing| {
                if existing.id == id {
                    next.clone()
                } else {
                    existing.clone()
                }
            })
            .collect();
        *guard = Arc::new(Catalog::new(albums, guard.generation + 1));
        true
    }
}

/// Tag data probed from a single audio file.
#[derive(Debug, Default)]
struct TrackMeta {
    title: Option<String>,
    album: Option<String>,
    album_artist: Option<String>,
    artist: Option<String>,
    duration_secs: Option<f64>,
    cover_art: Option<Artwork>,
}

/// Scan the media root plus configured playlists into unsorted albums.
///
/// Files that cannot be probed are skipped with a warning.
pub fn scan_albums(root: &Path, playlists: &[PlaylistConfig]) -> Result<Vec<Album>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("canonicalize root {:?}", root))?;
    if !root.is_dir() {
        return Err(anyhow::anyhow!("root is not a directory: {:?}", root));
    }

    tracing::info!(root = %root.display(), "scanning library");

    let mut ids = HashSet::new();
    let mut albums = Vec::new();
    scan_dir(&root, &mut ids, &mut albums)?;
    for playlist in playlists {
        if let Some(album) = build_playlist_album(playlist, &mut ids) {
            albums.push(album);
        }
    }

    tracing::info!(root = %root.display(), albums = albums.len(), "library scan complete");
    Ok(albums)
}

fn scan_dir(dir: &Path, ids: &mut HashSet<u32>, albums: &mut Vec<Album>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read dir {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    let mut audio = Vec::new();
    let mut images = Vec::new();
    let mut subdirs = Vec::new();
    for path in entries {
        let hidden = path
            .file_name()
            .and_then(OsStr::to_str)
            .map(|name| name.starts_with('.'))
            .unwrap_or(true);
        if hidden {
            continue;
        }
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        let ext = extension_of(&path);
        if is_supported_extension(&ext) {
            audio.push(path);
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            images.push(path);
        }
    }

    if !audio.is_empty() {
        if let Some(album) = build_dir_album(dir, &audio, &images, ids) {
            albums.push(album);
        }
    }

    for sub in subdirs {
        if let Err(e) = scan_dir(&sub, ids, albums) {
            tracing::warn!(dir = %sub.display(), error = %e, "skipping unreadable directory");
        }
    }
    Ok(())
}

fn build_dir_album(
    dir: &Path,
    audio: &[PathBuf],
    images: &[PathBuf],
    ids: &mut HashSet<u32>,
) -> Option<Album> {
    let (tracks, first_meta, embedded_cover) = probe_tracks(audio);
    if tracks.is_empty() {
        tracing::warn!(dir = %dir.display(), "no readable tracks; skipping album");
        return None;
    }

    let dir_name = dir
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("Untitled")
        .to_string();
    let title = first_meta
        .as_ref()
        .and_then(|m| m.album.clone())
        .unwrap_or(dir_name);
    let artist = first_meta
        .as_ref()
        .and_then(|m| m.album_artist.clone().or_else(|| m.artist.clone()))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let artwork = images.iter().find_map(|path| read_image(path)).or(embedded_cover);

    let id = allocate_id(&dir.to_string_lossy(), ids);
    tracing::debug!(album_id = id, dir = %dir.display(), tracks = tracks.len(), "album indexed");
    Some(Album {
        id,
        title,
        artist,
        tracks,
        artwork,
        enrichment: None,
    })
}

fn build_playlist_album(playlist: &PlaylistConfig, ids: &mut HashSet<u32>) -> Option<Album> {
    let paths: Vec<PathBuf> = playlist.tracks.iter().map(PathBuf::from).collect();
    let (tracks, first_meta, embedded_cover) = probe_tracks(&paths);
    if tracks.is_empty() {
        tracing::warn!(playlist = %playlist.title, "playlist has no readable tracks; skipping");
        return None;
    }
    let artist = playlist
        .artist
        .clone()
        .or_else(|| first_meta.and_then(|m| m.album_artist.or(m.artist)))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let artwork = playlist
        .artwork
        .as_deref()
        .and_then(|path| read_image(Path::new(path)))
        .or(embedded_cover);
    Some(Album {
        id: allocate_id(&format!("playlist:{}", playlist.title), ids),
        title: playlist.title.clone(),
        artist,
        tracks,
        artwork,
        enrichment: None,
    })
}

/// Probe every file, keeping readable ones in order with contiguous indices.
fn probe_tracks(paths: &[PathBuf]) -> (Vec<Track>, Option<TrackMeta>, Option<Artwork>) {
    let mut tracks = Vec::new();
    let mut first_meta = None;
    let mut cover = None;
    for path in paths {
        let mut meta = match probe_track_meta(path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable track");
                continue;
            }
        };
        if cover.is_none() {
            cover = meta.cover_art.take();
        }
        let title = meta.title.clone().unwrap_or_else(|| {
            path.file_stem()
                .and_then(OsStr::to_str)
                .unwrap_or("Untitled")
                .to_string()
        });
        tracks.push(Track {
            index: tracks.len(),
            title,
            duration_secs: meta.duration_secs.unwrap_or(0.0),
            path: path.clone(),
        });
        if first_meta.is_none() {
            first_meta = Some(meta);
        }
    }
    (tracks, first_meta, cover)
}

/// FNV-1a over the key, linearly probed past ids already taken.
fn allocate_id(key: &str, taken: &mut HashSet<u32>) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    while !taken.insert(hash) {
        hash = hash.wrapping_add(1);
    }
    hash
}

fn probe_track_meta(path: &Path) -> Result<TrackMeta> {
    let ext = extension_of(path);
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if !ext.is_empty() {
        hint.with_extension(&ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))?;

    let mut meta = TrackMeta::default();
    if let Some(track) = probed.format.default_track() {
        let params = &track.codec_params;
        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            if rate > 0 {
                meta.duration_secs = Some(frames as f64 / f64::from(rate));
            }
        }
    }

    // Tags may live in the container or in the probe-level metadata (ID3).
    if let Some(rev) = probed.format.metadata().current() {
        apply_tags(&mut meta, rev);
    }
    if let Some(mut probe_meta) = probed.metadata.get() {
        if let Some(rev) = probe_meta.skip_to_latest() {
            apply_tags(&mut meta, rev);
        }
    }
    Ok(meta)
}

fn apply_tags(meta: &mut TrackMeta, rev: &symphonia::core::meta::MetadataRevision) {
    for tag in rev.tags() {
        let value = tag.value.to_string();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match tag.std_key {
            Some(StandardTagKey::Album) => &mut meta.album,
            Some(StandardTagKey::AlbumArtist) => &mut meta.album_artist,
            Some(StandardTagKey::Artist) => &mut meta.artist,
            Some(StandardTagKey::TrackTitle) => &mut meta.title,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    if meta.cover_art.is_none() {
        meta.cover_art = select_cover_art(rev);
    }
}

fn select_cover_art(rev: &symphonia::core::meta::MetadataRevision) -> Option<Artwork> {
    let visual = rev
        .visuals()
        .iter()
        .find(|visual| visual.usage == Some(StandardVisualKey::FrontCover))
        .or_else(|| rev.visuals().first())?;
    if visual.data.len() > MAX_COVER_ART_BYTES {
        return None;
    }
    Some(Artwork {
        mime_type: visual.media_type.clone(),
        data: Arc::from(visual.data.as_ref()),
    })
}

fn read_image(path: &Path) -> Option<Artwork> {
    let mime_type = match extension_of(path).as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    match fs::read(path) {
        Ok(data) if data.len() <= MAX_COVER_ART_BYTES => Some(Artwork {
            mime_type: mime_type.to_string(),
            data: Arc::from(data),
        }),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "artwork too large; ignoring");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read artwork");
            None
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(OsStr::to_str)
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn is_supported_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext)
}

/// Helpers for building throwaway media trees in tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use super::{Album, Track};

    pub(crate) fn temp_root(label: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "album-deck-{}-{}",
            label,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).expect("create temp dir");
        root
    }

    /// Write a silent 16-bit mono PCM WAV file.
    pub(crate) fn write_wav(path: &Path, frames: u32) {
        let sample_rate: u32 = 8000;
        let data_len = frames * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);
        std::fs::write(path, bytes).expect("write wav");
    }

    /// In-memory album with `track_count` fake tracks.
    pub(crate) fn album(id: u32, title: &str, track_count: usize) -> Arc<Album> {
        Arc::new(Album {
            id,
            title: title.to_string(),
            artist: "Artist".to_string(),
            tracks: (0..track_count)
                .map(|index| Track {
                    index,
                    title: format!("Track {}", index + 1),
                    duration_secs: 1.0,
                    path: PathBuf::from(format!("/media/{title}/{index:02}.flac")),
                })
                .collect(),
            artwork: None,
            enrichment: None,
        })
    }
}
