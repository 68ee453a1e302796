use crate::events::{LogLevel, LogRecord, Timestamp};
use crate::processor::signatures::{self, SignatureKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Sample messages kept per signature kind
const MAX_SAMPLES: usize = 3;

/// Aggregate over one closed time window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowMetrics {
    /// Inclusive start of the window
    pub start: Timestamp,
    /// Exclusive end of the window
    pub end: Timestamp,
    pub total_records: u64,
    /// Counts indexed by [`LogLevel::index`]
    pub level_counts: [u64; 6],
    pub total_message_length: u64,
    pub error_keyword_count: u64,
    pub warning_keyword_count: u64,
    pub distinct_tags: usize,
    pub crash_count: u64,
    pub anr_count: u64,
    pub memory_count: u64,
    pub crash_samples: Vec<String>,
    pub anr_samples: Vec<String>,
    pub memory_samples: Vec<String>,
}

impl WindowMetrics {
    pub fn level_count(&self, level: LogLevel) -> u64 {
        self.level_counts[level.index()]
    }

    /// Records at Error level or above
    pub fn error_count(&self) -> u64 {
        self.level_count(LogLevel::Error) + self.level_count(LogLevel::Fatal)
    }

    /// Fraction of records at Error level or above, 0 for an empty window
    pub fn error_rate(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.error_count() as f64 / self.total_records as f64
        }
    }

    pub fn average_message_length(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.total_message_length as f64 / self.total_records as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }
}

/// Running aggregate for the window that is currently open
#[derive(Debug, Clone)]
pub struct WindowAccumulator {
    start: Timestamp,
    end: Timestamp,
    total_records: u64,
    level_counts: [u64; 6],
    total_message_length: u64,
    error_keyword_count: u64,
    warning_keyword_count: u64,
    tags: HashSet<String>,
    crash_count: u64,
    anr_count: u64,
    memory_count: u64,
    crash_samples: Vec<String>,
    anr_samples: Vec<String>,
    memory_samples: Vec<String>,
}

impl WindowAccumulator {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            total_records: 0,
            level_counts: [0; 6],
            total_message_length: 0,
            error_keyword_count: 0,
            warning_keyword_count: 0,
            tags: HashSet::new(),
            crash_count: 0,
            anr_count: 0,
            memory_count: 0,
            crash_samples: Vec::new(),
            anr_samples: Vec::new(),
            memory_samples: Vec::new(),
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Move the window to new bounds, keeping what it has counted
    pub fn rebase(&mut self, start: Timestamp, end: Timestamp) {
        self.start = start;
        self.end = end;
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Fold one record into the window
    ///
    /// # Returns
    ///
    /// The signature kind the record matched, if any.
    pub fn add(&mut self, record: &LogRecord) -> Option<SignatureKind> {
        self.total_records += 1;
        self.level_counts[record.level.index()] += 1;
        self.total_message_length += record.message.chars().count() as u64;
        self.error_keyword_count +=
            signatures::keyword_hits(&record.message, signatures::ERROR_KEYWORDS) as u64;
        self.warning_keyword_count +=
            signatures::keyword_hits(&record.message, signatures::WARNING_KEYWORDS) as u64;
        if !self.tags.contains(&record.tag) {
            self.tags.insert(record.tag.clone());
        }

        let kind = signatures::classify(record)?;
        let (count, samples) = match kind {
            SignatureKind::Crash => (&mut self.crash_count, &mut self.crash_samples),
            SignatureKind::Anr => (&mut self.anr_count, &mut self.anr_samples),
            SignatureKind::Memory => (&mut self.memory_count, &mut self.memory_samples),
        };
        *count += 1;
        if samples.len() < MAX_SAMPLES {
            samples.push(record.tagged_message());
        }
        Some(kind)
    }

    /// Close the window and compute its metrics
    pub fn finish(self) -> WindowMetrics {
        WindowMetrics {
            start: self.start,
            end: self.end,
            total_records: self.total_records,
            level_counts: self.level_counts,
            total_message_length: self.total_message_length,
            error_keyword_count: self.error_keyword_count,
            warning_keyword_count: self.warning_keyword_count,
            distinct_tags: self.tags.len(),
            crash_count: self.crash_count,
            anr_count: self.anr_count,
            memory_count: self.memory_count,
            crash_samples: self.crash_samples,
            anr_samples: self.anr_samples,
            memory_samples: self.memory_samples,
        }
    }
}
