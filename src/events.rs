//! Core record and alert types for the device log monitor
//!
//! This module defines the fundamental data structures passed between the
//! collector, the stream processor and the alert manager.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Open key-value map carried by alerts
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Device log priority, ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[serde(alias = "V")]
    Verbose,
    #[serde(alias = "D")]
    Debug,
    #[serde(alias = "I")]
    Info,
    #[serde(alias = "W")]
    Warn,
    #[serde(alias = "E")]
    Error,
    #[serde(alias = "F")]
    Fatal,
}

impl LogLevel {
    /// All levels in ascending order
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Verbose,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    /// Single-character code used by the log bridge (`V`, `D`, `I`, `W`, `E`, `F`)
    pub fn as_char(self) -> char {
        match self {
            LogLevel::Verbose => 'V',
            LogLevel::Debug => 'D',
            LogLevel::Info => 'I',
            LogLevel::Warn => 'W',
            LogLevel::Error => 'E',
            LogLevel::Fatal => 'F',
        }
    }

    pub fn from_char(code: char) -> Option<Self> {
        match code {
            'V' => Some(LogLevel::Verbose),
            'D' => Some(LogLevel::Debug),
            'I' => Some(LogLevel::Info),
            'W' => Some(LogLevel::Warn),
            'E' => Some(LogLevel::Error),
            'F' => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Position of the level in [`LogLevel::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(code), None) = (chars.next(), chars.next()) {
            if let Some(level) = LogLevel::from_char(code.to_ascii_uppercase()) {
                return Ok(level);
            }
        }

        match trimmed.to_lowercase().as_str() {
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" | "assert" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// One parsed line from the device log stream
///
/// Records are created by the collector for every successfully parsed line
/// and passed by value downstream. They are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// When the line was logged, millisecond precision
    pub timestamp: Timestamp,
    /// Process ID, absent for lines that don't carry one
    pub pid: Option<u32>,
    /// Thread ID, absent for lines that don't carry one
    pub tid: Option<u32>,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    /// Original text, kept for audit
    pub raw_line: String,
    /// Which log source emitted the line
    pub source_id: String,
}

impl LogRecord {
    /// Re-serialize the record in the `MM-DD HH:MM:SS.mmm PID TID L TAG: MESSAGE` format
    pub fn to_line(&self) -> String {
        let timestamp = self
            .timestamp
            .with_timezone(&Local)
            .format("%m-%d %H:%M:%S%.3f");

        let ids = match (self.pid, self.tid) {
            (Some(pid), Some(tid)) => format!(" {:>5} {:>5}", pid, tid),
            (Some(pid), None) => format!(" {:>5}", pid),
            (None, Some(tid)) => format!(" {:>5}", tid),
            (None, None) => String::new(),
        };

        format!(
            "{}{} {} {}: {}",
            timestamp,
            ids,
            self.level.as_char(),
            self.tag,
            self.message
        )
    }

    /// Tag and message joined the way signature patterns expect them
    pub fn tagged_message(&self) -> String {
        format!("{}: {}", self.tag, self.message)
    }
}

/// Severity of an alert raised by the stream processor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Informational, no action required
    Info,
    /// May require attention
    Warning,
    /// Something is broken
    Error,
    /// Requires immediate attention
    Critical,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Info,
        AlertLevel::Warning,
        AlertLevel::Error,
        AlertLevel::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert raised by a window rule or an anomaly scorer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Unique identifier
    pub id: String,
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
    pub timestamp: Timestamp,
    /// Name of the rule or component that raised the alert
    pub source: String,
    /// Rule-specific context
    pub metadata: Metadata,
}

impl Alert {
    /// Create an alert stamped with the current time and a fresh id
    pub fn new(
        level: AlertLevel,
        title: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            level,
            title: title.into(),
            description: description.into(),
            timestamp: Utc::now(),
            source: source.into(),
            metadata: Metadata::new(),
        }
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Key used for deduplication: alerts with equal keys describe the same problem
    pub fn dedup_key(&self) -> (String, String) {
        (self.title.clone(), self.source.clone())
    }
}
