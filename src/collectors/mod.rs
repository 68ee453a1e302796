//! Log collection: source process management, parsing, filtering and buffering

/// Subprocess-backed collector for a device log bridge
pub mod log_collector;

/// Synthetic collector replaying sample lines
pub mod mock_collector;

/// Parser for the thread-time line layout
pub mod parser;

/// Bounded drop-oldest record queue
pub mod buffer;

pub use buffer::RecordBuffer;
pub use log_collector::DeviceLogCollector;
pub use mock_collector::MockCollector;
pub use parser::LineParser;

use crate::error::CollectorError;
use crate::events::{LogLevel, LogRecord, Timestamp};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Which collector implementation the monitor builds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectorMode {
    #[default]
    Device,
    Mock,
}

/// Collector configuration, fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub mode: CollectorMode,
    /// Device serial; the first attached device is used when absent
    pub source_id: Option<String>,
    /// Records below this level are discarded
    pub min_level: LogLevel,
    /// Log buffers to select (`main`, `system`, `crash`, ...); empty means the bridge default
    pub buffers: Vec<String>,
    /// When non-empty, only these tags pass
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub max_buffer_size: usize,
    pub reconnect_interval_seconds: u64,
    pub io_timeout_seconds: u64,
    /// Full argv override for the source process
    pub command: Option<Vec<String>>,
    pub mock_interval_ms: u64,
    /// Replaces the built-in sample lines of the mock collector
    pub mock_lines: Option<Vec<String>>,
    pub mock_repeat: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            mode: CollectorMode::Device,
            source_id: None,
            min_level: LogLevel::Verbose,
            buffers: vec!["main".to_string(), "system".to_string(), "crash".to_string()],
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            max_buffer_size: 10_000,
            reconnect_interval_seconds: 5,
            io_timeout_seconds: 30,
            command: None,
            mock_interval_ms: 1000,
            mock_lines: None,
            mock_repeat: true,
        }
    }
}

impl CollectorConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_seconds)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }

    pub fn mock_interval(&self) -> Duration {
        Duration::from_millis(self.mock_interval_ms)
    }
}

/// Common contract of the device and mock collectors
pub trait LogCollector: Send {
    /// Launch the source and the read loop
    ///
    /// # Errors
    ///
    /// `CollectorError::AlreadyRunning` on a second call, or the reason the
    /// source could not be launched. On error the collector stays stopped.
    fn start(&mut self) -> Result<(), CollectorError>;

    /// Terminate the source and join the read loop
    fn stop(&mut self) -> Result<(), CollectorError>;

    fn is_running(&self) -> bool;

    /// Live counters shared with the read loop
    fn counters(&self) -> Arc<CollectorCounters>;

    /// Queue the read loop publishes records into
    fn records(&self) -> Arc<RecordBuffer>;

    /// Consistent snapshot of the collector counters
    fn get_stats(&self) -> CollectorStats {
        let mut stats = self.counters().snapshot();
        stats.dropped_records = self.records().dropped();
        stats
    }
}

/// Lock-free counters updated by the read loop and read from any thread
#[derive(Debug, Default)]
pub struct CollectorCounters {
    total_lines: AtomicU64,
    parsed_lines: AtomicU64,
    unparseable_lines: AtomicU64,
    filtered_lines: AtomicU64,
    enqueued_records: AtomicU64,
    errors: AtomicU64,
    source_launches: AtomicU64,
    running: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    last_record_at: Mutex<Option<Timestamp>>,
}

/// Point-in-time view of [`CollectorCounters`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectorStats {
    pub total_lines: u64,
    pub parsed_lines: u64,
    pub unparseable_lines: u64,
    pub filtered_lines: u64,
    pub enqueued_records: u64,
    pub dropped_records: u64,
    pub errors: u64,
    pub source_launches: u64,
    pub uptime_seconds: u64,
    pub last_record_at: Option<Timestamp>,
    pub running: bool,
}

impl CollectorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip to running and reset the uptime clock
    ///
    /// Returns `false` if the collector was already running.
    pub fn mark_started(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        true
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch(&self) {
        self.source_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn launches(&self) -> u64 {
        self.source_launches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CollectorStats {
        let uptime_seconds = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|started| started.elapsed().as_secs())
            .unwrap_or(0);

        CollectorStats {
            total_lines: self.total_lines.load(Ordering::Relaxed),
            parsed_lines: self.parsed_lines.load(Ordering::Relaxed),
            unparseable_lines: self.unparseable_lines.load(Ordering::Relaxed),
            filtered_lines: self.filtered_lines.load(Ordering::Relaxed),
            enqueued_records: self.enqueued_records.load(Ordering::Relaxed),
            dropped_records: 0,
            errors: self.errors(),
            source_launches: self.launches(),
            uptime_seconds,
            last_record_at: *self
                .last_record_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            running: self.is_running(),
        }
    }
}

/// Level floor plus tag include/exclude sets
#[derive(Debug, Clone)]
pub struct RecordFilter {
    min_level: LogLevel,
    include_tags: HashSet<String>,
    exclude_tags: HashSet<String>,
}

impl RecordFilter {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            min_level: config.min_level,
            include_tags: config.include_tags.iter().cloned().collect(),
            exclude_tags: config.exclude_tags.iter().cloned().collect(),
        }
    }

    pub fn accepts(&self, record: &LogRecord) -> bool {
        if record.level < self.min_level {
            return false;
        }
        if !self.include_tags.is_empty() && !self.include_tags.contains(&record.tag) {
            return false;
        }
        !self.exclude_tags.contains(&record.tag)
    }
}

/// Parse, filter and enqueue raw lines on behalf of a collector read loop
#[derive(Debug, Clone)]
pub struct LineIngestor {
    parser: LineParser,
    filter: RecordFilter,
    buffer: Arc<RecordBuffer>,
    counters: Arc<CollectorCounters>,
    source_id: String,
    /// Replace parsed timestamps with the arrival time
    restamp: bool,
}

impl LineIngestor {
    pub fn new(
        config: &CollectorConfig,
        source_id: String,
        buffer: Arc<RecordBuffer>,
        counters: Arc<CollectorCounters>,
    ) -> Self {
        Self {
            parser: LineParser::new(),
            filter: RecordFilter::from_config(config),
            buffer,
            counters,
            source_id,
            restamp: false,
        }
    }

    /// Stamp records with the time they were read instead of the time in the line
    pub fn restamped(mut self) -> Self {
        self.restamp = true;
        self
    }

    /// Count a line dropped for exceeding the read buffer
    pub fn reject_oversized(&self, length: usize) {
        self.counters.total_lines.fetch_add(1, Ordering::Relaxed);
        self.counters.unparseable_lines.fetch_add(1, Ordering::Relaxed);
        warn!("Skipping a line of more than {} bytes", length);
    }

    /// Handle one raw line; never fails
    ///
    /// # Returns
    ///
    /// `true` if a record was enqueued.
    pub fn ingest(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        self.counters.total_lines.fetch_add(1, Ordering::Relaxed);

        let mut record = match self.parser.parse(line, &self.source_id) {
            Some(record) => record,
            None => {
                self.counters.unparseable_lines.fetch_add(1, Ordering::Relaxed);
                debug!("Skipping unparseable line: {}", line.trim_end());
                return false;
            }
        };
        self.counters.parsed_lines.fetch_add(1, Ordering::Relaxed);

        if self.restamp {
            record.timestamp = Utc::now();
        }

        if !self.filter.accepts(&record) {
            self.counters.filtered_lines.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        *self
            .counters
            .last_record_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(record.timestamp);

        if let Some(evicted) = self.buffer.push(record) {
            debug!("Record buffer full, dropped record from {}", evicted.timestamp);
        }
        self.counters.enqueued_records.fetch_add(1, Ordering::Relaxed);
        true
    }
}
