//! Media resolution via an external lookup command
//!
//! [`MediaResolver`] is the boundary to the external lookup service; the
//! production implementation shells out to a yt-dlp-compatible command and
//! parses its JSON dump. Fallback is an explicit two-step pipeline: attempt
//! the full query, then the bare title once, then surface a definitive
//! failure. No recursion, no further levels.

use crate::cache::ResolvedMedia;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Boundary to the external lookup service
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve a free-text track reference into a playable record. The
    /// timeout is the caller's bound; a resolver call never blocks past it.
    async fn resolve(&self, query: &str, timeout: Duration) -> Result<ResolvedMedia>;
}

/// Two-step fallback pipeline: `attempt(query)` then, for
/// `"<artist> - <title>"` shapes, `attempt(<title>)` exactly once. A second
/// failure is definitive.
pub async fn resolve_with_fallback(
    resolver: &dyn MediaResolver,
    query: &str,
    timeout: Duration,
) -> Result<ResolvedMedia> {
    match resolver.resolve(query, timeout).await {
        Ok(media) => Ok(media),
        Err(first) => match simplify_query(query) {
            Some(fallback) => {
                debug!(query, fallback = %fallback, "retrying with simplified query");
                resolver.resolve(&fallback, timeout).await
            }
            None => Err(first),
        },
    }
}

/// Title-only form of an `"<artist> - <title>"` query; `None` when the query
/// has no artist prefix to strip.
pub fn simplify_query(query: &str) -> Option<String> {
    let (_, title) = query.split_once(" - ")?;
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// True when a format selector looks like a bare codec identifier with no
/// protocol or container hint. Non-fatal; playback proceeds.
pub fn format_looks_suspicious(selector: &str) -> bool {
    let s = selector.trim();
    if s.is_empty() {
        return true;
    }
    if matches!(s, "140" | "251" | "bestaudio") {
        return true;
    }
    !s.contains("[protocol") && !s.contains('/')
}

/// Production resolver: spawns the lookup command and reads one JSON
/// document from stdout.
pub struct CommandResolver {
    command: String,
    selector: String,
}

impl CommandResolver {
    pub fn new(command: String, selector: String) -> Self {
        Self { command, selector }
    }
}

#[async_trait]
impl MediaResolver for CommandResolver {
    async fn resolve(&self, query: &str, timeout: Duration) -> Result<ResolvedMedia> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--default-search")
            .arg("ytsearch")
            .arg("--format")
            .arg(&self.selector)
            .arg("--no-warnings")
            .arg(query)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| Error::Resolution {
                query: query.to_string(),
                reason: format!("lookup timed out after {:?}", timeout),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Resolution {
                query: query.to_string(),
                reason: stderr.trim().lines().last().unwrap_or("lookup failed").to_string(),
            });
        }

        let doc: Value =
            serde_json::from_slice(&output.stdout).map_err(|e| Error::Resolution {
                query: query.to_string(),
                reason: format!("unparseable lookup output: {}", e),
            })?;
        build_media(query, &doc)
    }
}

/// Turn one lookup JSON document into a [`ResolvedMedia`], deriving display
/// title/artist from the query when the result metadata is unreliable.
fn build_media(query: &str, doc: &Value) -> Result<ResolvedMedia> {
    // Search results arrive as a playlist wrapper; take the first hit
    let hit = match doc.get("entries").and_then(Value::as_array) {
        Some(entries) => entries.first().ok_or_else(|| Error::Resolution {
            query: query.to_string(),
            reason: "no search results".into(),
        })?,
        None => doc,
    };

    let url = hit
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Resolution {
            query: query.to_string(),
            reason: "result carries no direct URL".into(),
        })?
        .to_string();

    let title_raw = hit
        .get("track")
        .and_then(Value::as_str)
        .or_else(|| hit.get("title").and_then(Value::as_str))
        .unwrap_or("Unknown")
        .to_string();
    let album = hit.get("album").and_then(Value::as_str).map(str::to_string);
    let duration = hit.get("duration").and_then(Value::as_f64);
    let format = hit.get("format").and_then(Value::as_str).map(str::to_string);

    let artist_query = query.split_once(" - ").map(|(a, _)| a.trim()).unwrap_or(query.trim());
    let artist_match = ["artist", "album_artist", "composer", "creator", "uploader"]
        .iter()
        .filter_map(|key| hit.get(*key).and_then(Value::as_str))
        .find(|candidate| candidate.to_lowercase().contains(&artist_query.to_lowercase()));

    let (title, artist) = if title_raw.to_lowercase().contains(&artist_query.to_lowercase()) {
        (title_raw.clone(), artist_query.to_string())
    } else if artist_match.is_some() {
        (format!("{} - {}", artist_query, title_raw), artist_query.to_string())
    } else {
        (
            format!("{} - ({} ?)", title_raw, artist_query),
            format!("Unknown / maybe {}", artist_query),
        )
    };

    let expire_ts = extract_expire_ts(&url);
    if expire_ts.is_none() {
        warn!(query, "resolved URL carries no expiry hint");
    }
    let expires = expire_ts
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());

    Ok(ResolvedMedia {
        title,
        artist,
        album,
        duration,
        url,
        format,
        resolved: true,
        timestamp: Utc::now(),
        expires,
        expire_ts,
    })
}

/// Epoch-seconds `expire` query parameter of an edge URL, if any
fn extract_expire_ts(url: &str) -> Option<i64> {
    for (idx, _) in url.match_indices("expire=") {
        if idx == 0 {
            continue;
        }
        let prev = url.as_bytes()[idx - 1];
        if prev != b'?' && prev != b'&' {
            continue;
        }
        let digits: String = url[idx + "expire=".len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if !digits.is_empty() {
            return digits.parse().ok();
        }
    }
    None
}
