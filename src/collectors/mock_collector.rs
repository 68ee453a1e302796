use crate::collectors::log_collector::sleep_while_running;
use crate::collectors::{
    CollectorConfig, CollectorCounters, LineIngestor, LogCollector, RecordBuffer,
};
use crate::error::CollectorError;
use log::{debug, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Source id stamped on synthetic records unless one is configured
const MOCK_SOURCE_ID: &str = "mock_device";

/// Lines replayed when no custom sample set is configured
pub const SAMPLE_LINES: [&str; 8] = [
    "01-01 10:00:00.123  1234  1234 I ActivityManager: Start proc com.example.app",
    "01-01 10:00:01.234  1234  1234 D MyApp: User clicked button",
    "01-01 10:00:02.345  1234  1234 I MyApp: Loading data from server",
    "01-01 10:00:03.456  1234  1234 W MyApp: Network timeout, retrying",
    "01-01 10:00:04.567  1234  1234 E AndroidRuntime: FATAL EXCEPTION: main",
    "01-01 10:00:05.678  5678  5678 I ActivityManager: ANR in com.example.app",
    "01-01 10:00:06.789  2345  2345 E System: OutOfMemoryError: Failed to allocate",
    "01-01 10:00:07.890  3456  3456 W AudioFlinger: write blocked for 150 msecs",
];

/// Collector that replays sample lines instead of reading a device
///
/// Lines go through the same parser, filters and bounded buffer as the
/// device collector, stamped with the time they are emitted.
pub struct MockCollector {
    config: CollectorConfig,
    buffer: Arc<RecordBuffer>,
    counters: Arc<CollectorCounters>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MockCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            buffer: Arc::new(RecordBuffer::new(config.max_buffer_size)),
            counters: Arc::new(CollectorCounters::new()),
            thread_handle: None,
            config,
        }
    }

    fn sample_lines(&self) -> Vec<String> {
        match &self.config.mock_lines {
            Some(lines) => lines.clone(),
            None => SAMPLE_LINES.iter().map(|line| line.to_string()).collect(),
        }
    }

    fn generator_thread(
        lines: Vec<String>,
        repeat: bool,
        interval: Duration,
        ingestor: LineIngestor,
        counters: Arc<CollectorCounters>,
    ) {
        let mut index = 0usize;

        while counters.is_running() {
            if index < lines.len() || (repeat && !lines.is_empty()) {
                ingestor.ingest(&lines[index % lines.len()]);
                index += 1;
            } else if index == lines.len() {
                debug!("Mock collector replayed all {} sample lines", lines.len());
                index += 1;
            }

            if !sleep_while_running(interval, &counters) {
                break;
            }
        }

        info!("Mock collector thread finished");
    }
}

impl LogCollector for MockCollector {
    fn start(&mut self) -> Result<(), CollectorError> {
        if !self.counters.mark_started() {
            return Err(CollectorError::AlreadyRunning);
        }
        self.counters.record_launch();

        let source_id = self
            .config
            .source_id
            .clone()
            .unwrap_or_else(|| MOCK_SOURCE_ID.to_string());
        let ingestor = LineIngestor::new(
            &self.config,
            source_id,
            Arc::clone(&self.buffer),
            Arc::clone(&self.counters),
        )
        .restamped();

        let lines = self.sample_lines();
        let repeat = self.config.mock_repeat;
        let interval = self.config.mock_interval();
        let counters = Arc::clone(&self.counters);

        let handle = thread::Builder::new()
            .name("logwatch-mock-collector".to_string())
            .spawn(move || Self::generator_thread(lines, repeat, interval, ingestor, counters))
            .map_err(|e| {
                self.counters.mark_stopped();
                CollectorError::SubprocessSpawn(format!("mock collector thread: {}", e))
            })?;

        self.thread_handle = Some(handle);
        info!("Mock collector started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CollectorError> {
        let was_running = self.counters.is_running();
        self.counters.mark_stopped();

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| {
                CollectorError::SubprocessTerminated("Failed to join mock collector thread".to_string())
            })?;
        }

        if was_running {
            info!("Mock collector stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.counters.is_running()
    }

    fn counters(&self) -> Arc<CollectorCounters> {
        Arc::clone(&self.counters)
    }

    fn records(&self) -> Arc<RecordBuffer> {
        Arc::clone(&self.buffer)
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use chrono::Utc;
    use std::time::Instant;

    fn fast_config(repeat: bool) -> CollectorConfig {
        CollectorConfig {
            mode: crate::collectors::CollectorMode::Mock,
            mock_interval_ms: 5,
            mock_repeat: repeat,
            ..CollectorConfig::default()
        }
    }

    fn wait_for_records(buffer: &RecordBuffer, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if buffer.len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_sample_lines_all_parse() {
        let parser = crate::collectors::LineParser::with_year(2024);
        for line in SAMPLE_LINES {
            assert!(parser.parse(line, MOCK_SOURCE_ID).is_some(), "{}", line);
        }
    }

    #[test]
    fn test_single_pass_emits_each_line_once() {
        let mut collector = MockCollector::new(fast_config(false));
        let before = Utc::now();
        collector.start().unwrap();

        let buffer = collector.records();
        assert!(wait_for_records(&buffer, SAMPLE_LINES.len()));
        thread::sleep(Duration::from_millis(50));
        assert!(collector.is_running());
        collector.stop().unwrap();

        let records = buffer.drain();
        assert_eq!(records.len(), SAMPLE_LINES.len());
        assert_eq!(records[4].tag, "AndroidRuntime");
        assert!(records.iter().all(|r| r.source_id == MOCK_SOURCE_ID));
        assert!(records.iter().all(|r| r.timestamp >= before));
    }

    #[test]
    fn test_repeat_loops_over_samples() {
        let mut collector = MockCollector::new(fast_config(true));
        collector.start().unwrap();

        let buffer = collector.records();
        assert!(wait_for_records(&buffer, SAMPLE_LINES.len() + 2));
        collector.stop().unwrap();

        let records = buffer.drain();
        assert_eq!(records[SAMPLE_LINES.len()].message, records[0].message);
    }

    #[test]
    fn test_filters_apply_to_samples() {
        let mut config = fast_config(false);
        config.min_level = LogLevel::Error;
        config.mock_lines = Some(vec![
            "01-01 10:00:00.000 I A: info".to_string(),
            "01-01 10:00:00.000 E B: error".to_string(),
            "not a log line".to_string(),
        ]);

        let mut collector = MockCollector::new(config);
        collector.start().unwrap();
        let counters = collector.counters();
        let deadline = Instant::now() + Duration::from_secs(5);
        while counters.snapshot().total_lines < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        collector.stop().unwrap();

        let stats = collector.get_stats();
        assert_eq!(stats.total_lines, 3);
        assert_eq!(stats.filtered_lines, 1);
        assert_eq!(stats.unparseable_lines, 1);
        assert_eq!(collector.records().drain().len(), 1);
    }

    #[test]
    fn test_double_start() {
        let mut collector = MockCollector::new(fast_config(true));
        collector.start().unwrap();
        assert!(matches!(collector.start(), Err(CollectorError::AlreadyRunning)));
        collector.stop().unwrap();
        collector.stop().unwrap();
        assert!(!collector.is_running());
    }
}
