//! MusicBrainz release search and Cover Art Archive fetches.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::config::MusicBrainzConfig;
use crate::enricher::{MetadataSource, ReleaseLookup, ReleaseMatch};
use crate::library::Artwork;

const DEFAULT_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const DEFAULT_USER_AGENT: &str = concat!("album-deck/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;
const CAA_BASE_URL: &str = "https://coverartarchive.org/release";
const MAX_COVER_BYTES: u64 = 5_000_000;
/// Lowest search score accepted as the same release.
pub const MIN_MATCH_SCORE: i32 = 90;
const SEARCH_LIMIT: u32 = 5;

pub struct MusicBrainzClient {
    agent: ureq::Agent,
    base_url: String,
    rate_limit: Duration,
    last_request: Mutex<Instant>,
    cover_art: bool,
}

impl MusicBrainzClient {
    /// Build a client from config, or `None` when lookups are disabled.
    pub fn new(config: Option<&MusicBrainzConfig>) -> Result<Option<Arc<Self>>> {
        let Some(config) = config else {
            return Ok(None);
        };
        if !config.enabled.unwrap_or(false) {
            return Ok(None);
        }
        let user_agent = config
            .user_agent
            .clone()
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            bail!("musicbrainz base_url must be http(s): {base_url}");
        }
        let rate_limit = Duration::from_millis(config.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS));
        let agent_config = ureq::Agent::config_builder()
            .user_agent(&user_agent)
            .timeout_global(Some(Duration::from_secs(15)))
            .build();
        tracing::info!(base_url = %base_url, user_agent = %user_agent, "musicbrainz lookups enabled");
        Ok(Some(Arc::new(Self {
            agent: ureq::Agent::new_with_config(agent_config),
            base_url,
            rate_limit,
            last_request: Mutex::new(ready_instant(rate_limit)),
            cover_art: config.cover_art.unwrap_or(true),
        })))
    }

    fn wait_rate_limit(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let elapsed = last.elapsed();
        if elapsed < self.rate_limit {
            std::thread::sleep(self.rate_limit - elapsed);
        }
        *last = Instant::now();
    }

    fn search_releases(&self, query: &str) -> Result<Vec<ReleaseResult>> {
        self.wait_rate_limit();
        let url = format!("{}/release", self.base_url);
        let resp = self
            .agent
            .get(&url)
            .query("fmt", "json")
            .query("query", query)
            .query("limit", SEARCH_LIMIT.to_string())
            .config()
            .http_status_as_error(false)
            .build()
            .call()
            .with_context(|| format!("musicbrainz request failed (transport) url={url}"))?;
        let code = resp.status();
        if code.as_u16() >= 400 {
            bail!("musicbrainz request failed (status {code}) url={url}");
        }
        let body_str = resp
            .into_body()
            .with_config()
            .limit(1_000_000)
            .read_to_string()
            .context("musicbrainz response read failed")?;
        let body: ReleaseSearchResponse =
            serde_json::from_str(&body_str).context("musicbrainz response parse failed")?;
        Ok(body.releases)
    }
}

/// Instant from which one rate-limit window has already passed.
///
/// Falls back to now when the window predates the monotonic clock's origin.
fn ready_instant(rate_limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_sub(rate_limit).unwrap_or(now)
}

impl MetadataSource for MusicBrainzClient {
    fn lookup_release(&self, title: &str, artist: &str) -> Result<ReleaseLookup> {
        let query = build_release_query(title, artist);
        let mut releases = self.search_releases(&query)?;
        if releases.is_empty() {
            if let Some(stripped) = strip_edition_suffix(title) {
                tracing::debug!(title, stripped = %stripped, "retrying release search without suffix");
                releases = self.search_releases(&build_release_query(&stripped, artist))?;
            }
        }
        Ok(pick_release(query, releases))
    }

    fn fetch_front_cover(&self, mbid: &str) -> Result<Option<Artwork>> {
        if !self.cover_art {
            return Ok(None);
        }
        self.wait_rate_limit();
        let url = format!("{CAA_BASE_URL}/{mbid}/front-250");
        let resp = self
            .agent
            .get(&url)
            .config()
            .http_status_as_error(false)
            .build()
            .call()
            .context("cover art request failed")?;
        let code = resp.status().as_u16();
        if code == 404 {
            return Ok(None);
        }
        if code >= 400 {
            bail!("cover art request failed (status {code}) url={url}");
        }
        let mime_type = resp
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = resp
            .into_body()
            .with_config()
            .limit(MAX_COVER_BYTES)
            .read_to_vec()
            .context("cover art read failed")?;
        Ok(Some(Artwork {
            mime_type,
            data: Arc::from(bytes),
        }))
    }
}

fn pick_release(query: String, releases: Vec<ReleaseResult>) -> ReleaseLookup {
    let best = releases.into_iter().max_by_key(|r| r.score.unwrap_or(0));
    match best {
        Some(release) if release.score.unwrap_or(0) >= MIN_MATCH_SCORE => {
            ReleaseLookup::Match(ReleaseMatch {
                mbid: release.id,
                title: release.title,
                year: release.date.as_deref().and_then(parse_year),
                score: release.score.unwrap_or(0),
            })
        }
        other => ReleaseLookup::NoMatch {
            query,
            top_score: other.and_then(|r| r.score),
        },
    }
}

fn build_release_query(title: &str, artist: &str) -> String {
    format!(
        "release:\"{}\" AND artist:\"{}\"",
        escape_query(title),
        escape_query(artist)
    )
}

fn escape_query(raw: &str) -> String {
    raw.replace('"', "\\\"")
}

/// Drop bracketed edition notes and ` - ` suffixes, e.g. "X (Remaster)".
fn strip_edition_suffix(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    let out = match out.split_once(" - ") {
        Some((head, _)) => head.to_string(),
        None => out,
    };
    let out = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if out.is_empty() || out == raw.trim() {
        None
    } else {
        Some(out)
    }
}

fn parse_year(raw: &str) -> Option<i32> {
    raw.split('-').next()?.trim().parse::<i32>().ok()
}

#[derive(Debug, Deserialize)]
struct ReleaseSearchResponse {
    #[serde(default)]
    releases: Vec<ReleaseResult>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResult {
    id: String,
    score: Option<i32>,
    title: String,
    date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(id: &str, score: i32, date: Option<&str>) -> ReleaseResult {
        ReleaseResult {
            id: id.to_string(),
            score: Some(score),
            title: "Title".to_string(),
            date: date.map(str::to_string),
        }
    }

    #[test]
    fn build_release_query_escapes_quotes() {
        let query = build_release_query("Album \"One\"", "Artist");
        assert_eq!(query, "release:\"Album \\\"One\\\"\" AND artist:\"Artist\"");
    }

    #[test]
    fn parse_year_handles_full_date() {
        assert_eq!(parse_year("1999-04-01"), Some(1999));
        assert_eq!(parse_year("2004"), Some(2004));
        assert_eq!(parse_year(""), None);
    }

    #[test]
    fn strip_edition_suffix_removes_brackets_and_dash() {
        assert_eq!(
            strip_edition_suffix("Hunting High and Low (2015 Remaster)").as_deref(),
            Some("Hunting High and Low")
        );
        assert_eq!(
            strip_edition_suffix("Album Title [Deluxe Edition]").as_deref(),
            Some("Album Title")
        );
        assert_eq!(
            strip_edition_suffix("One Under God - Chapter 1").as_deref(),
            Some("One Under God")
        );
        assert_eq!(strip_edition_suffix("Plain"), None);
    }

    #[test]
    fn best_release_above_threshold_matches() {
        let lookup = pick_release(
            "q".to_string(),
            vec![release("a", 80, None), release("b", 97, Some("1985-09-01"))],
        );
        match lookup {
            ReleaseLookup::Match(m) => {
                assert_eq!(m.mbid, "b");
                assert_eq!(m.year, Some(1985));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn low_scores_report_no_match_with_top_score() {
        let lookup = pick_release("q".to_string(), vec![release("a", 72, None)]);
        assert_eq!(
            lookup,
            ReleaseLookup::NoMatch {
                query: "q".to_string(),
                top_score: Some(72),
            }
        );
        let empty = pick_release("q".to_string(), Vec::new());
        assert_eq!(
            empty,
            ReleaseLookup::NoMatch {
                query: "q".to_string(),
                top_score: None,
            }
        );
    }

    #[test]
    fn disabled_config_builds_no_client() {
        assert!(MusicBrainzClient::new(None).unwrap().is_none());
        let config = MusicBrainzConfig {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(MusicBrainzClient::new(Some(&config)).unwrap().is_none());
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let config = MusicBrainzConfig {
            enabled: Some(true),
            base_url: Some("ftp://example".to_string()),
            ..Default::default()
        };
        assert!(MusicBrainzClient::new(Some(&config)).is_err());
    }

    #[test]
    fn rate_limit_longer_than_clock_uptime_is_accepted() {
        let config = MusicBrainzConfig {
            enabled: Some(true),
            rate_limit_ms: Some(u64::MAX),
            ..Default::default()
        };
        let client = MusicBrainzClient::new(Some(&config)).unwrap().unwrap();
        assert!(client.last_request.lock().unwrap().elapsed() < Duration::from_secs(60));

        let window = Duration::from_millis(10);
        assert!(ready_instant(window).elapsed() >= window);
    }
}
