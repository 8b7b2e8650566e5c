//! Reader for the externally owned reference log
//!
//! The log is an append-only text file of lines shaped
//! `"Artist - Title [Album | Timestamp]"`. This service never writes it; it
//! reads it to populate the queue and to compute the valid-key set for cache
//! pruning. Queue entries reference log lines by index, so every reload
//! invalidates previously handed-out indices.

use crate::error::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Most recent entries shown and queued, newest first
const VIEW_LIMIT: usize = 50;

/// One parsed log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The free-text track reference, e.g. `"Artist - Title"`; this is the
    /// resolution-cache key.
    pub query: String,
    /// Bracketed suffix content (`"Album | Timestamp"`), display-only
    pub meta: String,
}

/// Handle on the reference log file
#[derive(Debug, Clone)]
pub struct SongLog {
    path: PathBuf,
}

impl SongLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the queueable view of the log: last [`VIEW_LIMIT`] non-empty
    /// lines, newest first. A missing file is an empty log.
    pub fn load(&self) -> Result<Vec<LogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let entries: Vec<LogEntry> = lines
            .iter()
            .rev()
            .take(VIEW_LIMIT)
            .map(|line| parse_line(line))
            .collect();
        debug!(count = entries.len(), "loaded reference log");
        Ok(entries)
    }

    /// Set of queries still present in the log, for cache pruning
    pub fn valid_queries(entries: &[LogEntry]) -> HashSet<String> {
        entries.iter().map(|e| e.query.clone()).collect()
    }
}

fn parse_line(line: &str) -> LogEntry {
    // Split on the last '[' so titles containing brackets stay intact
    if let Some(open) = line.rfind('[') {
        if line.ends_with(']') {
            let query = line[..open].trim().to_string();
            let meta = line[open + 1..line.len() - 1].trim().to_string();
            return LogEntry { query, meta };
        }
    }
    LogEntry {
        query: line.trim().to_string(),
        meta: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(lines: &[&str]) -> (tempfile::TempDir, SongLog) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songlog.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        (dir, SongLog::new(path))
    }

    #[test]
    fn parses_query_and_meta() {
        let entry = parse_line("Nina Simone - Sinnerman [Pastel Blues | 01-02-2026 21:14:02]");
        assert_eq!(entry.query, "Nina Simone - Sinnerman");
        assert_eq!(entry.meta, "Pastel Blues | 01-02-2026 21:14:02");
    }

    #[test]
    fn line_without_suffix_is_all_query() {
        let entry = parse_line("FIP Radio");
        assert_eq!(entry.query, "FIP Radio");
        assert_eq!(entry.meta, "");
    }

    #[test]
    fn bracket_inside_title_survives() {
        let entry = parse_line("Artist - Song [Live] [Album | 2026]");
        assert_eq!(entry.query, "Artist - Song [Live]");
        assert_eq!(entry.meta, "Album | 2026");
    }

    #[test]
    fn newest_first_and_blank_lines_skipped() {
        let (_dir, log) = write_log(&["A - One [x | 1]", "", "B - Two [y | 2]"]);
        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "B - Two");
        assert_eq!(entries[1].query, "A - One");
    }

    #[test]
    fn view_is_capped() {
        let lines: Vec<String> = (0..80).map(|i| format!("Artist - Track {} [a | t]", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (_dir, log) = write_log(&refs);
        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].query, "Artist - Track 79");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = SongLog::new(dir.path().join("absent.txt"));
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn valid_query_set() {
        let (_dir, log) = write_log(&["A - One [x | 1]", "B - Two [y | 2]"]);
        let entries = log.load().unwrap();
        let valid = SongLog::valid_queries(&entries);
        assert!(valid.contains("A - One"));
        assert!(valid.contains("B - Two"));
        assert_eq!(valid.len(), 2);
    }
}
