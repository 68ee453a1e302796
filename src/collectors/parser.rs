use crate::events::{LogLevel, LogRecord, Timestamp};
use chrono::{Datelike, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

/// `MM-DD HH:MM:SS.mmm [PID] [TID] L TAG: MESSAGE`
const LINE_PATTERN: &str = r"^(\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2}\.\d{3})\s+(?:(\d+)\s+)?(?:(\d+)\s+)?([VDIWEF])\s+(\S[^:]*?)\s*:\s?(.*)$";

/// Parser for device log lines in the thread-time layout
///
/// Lines carry no year, so the parser stamps every record with the year it
/// was configured with (the current local year by default) and interprets the
/// time of day in the local timezone.
#[derive(Debug, Clone)]
pub struct LineParser {
    year: i32,
    pattern: Regex,
}

impl LineParser {
    pub fn new() -> Self {
        Self::with_year(Local::now().year())
    }

    /// Create a parser that assumes the given calendar year
    pub fn with_year(year: i32) -> Self {
        Self {
            year,
            pattern: Regex::new(LINE_PATTERN).expect("line pattern is a valid regex"),
        }
    }

    /// Parse one raw line into a record
    ///
    /// # Arguments
    ///
    /// * `line` - Raw text, with or without the trailing newline
    /// * `source_id` - Identifier of the log source that emitted the line
    ///
    /// # Returns
    ///
    /// `None` when the line does not match the expected layout or carries an
    /// impossible date. Parsing never panics on arbitrary input.
    pub fn parse(&self, line: &str, source_id: &str) -> Option<LogRecord> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let caps = self.pattern.captures(trimmed)?;

        let timestamp = self.timestamp(&caps[1], &caps[2])?;
        let pid = caps.get(3).and_then(|m| m.as_str().parse().ok());
        let tid = caps.get(4).and_then(|m| m.as_str().parse().ok());
        let level = caps[5].chars().next().and_then(LogLevel::from_char)?;

        Some(LogRecord {
            timestamp,
            pid,
            tid,
            level,
            tag: caps[6].to_string(),
            message: caps[7].to_string(),
            raw_line: trimmed.to_string(),
            source_id: source_id.to_string(),
        })
    }

    fn timestamp(&self, date: &str, time: &str) -> Option<Timestamp> {
        let text = format!("{}-{} {}", self.year, date, time);
        let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.3f").ok()?;

        // Times skipped by a DST transition have no local mapping, fall back to UTC
        Some(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        )
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}
