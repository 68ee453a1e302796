//! Windowed stream processing of log records into alerts

/// Built-in window rules
pub mod rules;

/// Optional anomaly scorers
pub mod scorer;

/// Crash, ANR and memory signatures
pub mod signatures;

/// Window metrics and accumulation
pub mod window;

pub use rules::{default_rules, WindowRule};
pub use scorer::{AnomalyScorer, BaselineScorer, NoopScorer};
pub use window::{WindowAccumulator, WindowMetrics};

use crate::config::MAX_INTERVAL_SECONDS;
use crate::error::ConfigError;
use crate::events::{Alert, LogLevel, LogRecord, Timestamp};
use chrono::Duration;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

/// Elapsed windows evaluated one by one before the clock skips ahead
const MAX_CATCH_UP_WINDOWS: u32 = 10;

/// Handler receiving every alert the processor raises
pub type AlertHandler = Box<dyn Fn(&Alert) + Send>;

/// Window length and rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    pub window_seconds: u64,
    /// Fraction of error records above which the error-rate rule fires
    pub error_rate_threshold: f64,
    /// Minimum number of error records before the error-rate rule may fire
    pub min_error_count: u64,
    pub crash_threshold: u64,
    pub anr_threshold: u64,
    pub memory_threshold: u64,
    /// Records per window above which a volume spike is reported
    pub volume_spike_threshold: u64,
    pub enable_anomaly_scorer: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            error_rate_threshold: 0.1,
            min_error_count: 5,
            crash_threshold: 1,
            anr_threshold: 1,
            memory_threshold: 1,
            volume_spike_threshold: 1000,
            enable_anomaly_scorer: false,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "processor.window_seconds must be greater than 0".to_string(),
            ));
        }
        if self.window_seconds > MAX_INTERVAL_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "processor.window_seconds must not exceed {}",
                MAX_INTERVAL_SECONDS
            )));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "processor.error_rate_threshold must be within [0, 1], got {}",
                self.error_rate_threshold
            )));
        }
        Ok(())
    }
}

/// Counters reported by [`StreamProcessor::get_metrics`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessorMetrics {
    pub records_processed: u64,
    pub windows_evaluated: u64,
    pub error_count: u64,
    pub crash_count: u64,
    pub anr_count: u64,
    pub memory_count: u64,
    pub alerts_generated: u64,
    pub current_window_records: u64,
    pub running: bool,
    /// Name of the anomaly scorer in use
    pub scorer: String,
}

/// Converts a record stream into alerts using fixed wall-clock windows
///
/// Windows are laid on a grid that starts at the first record or tick.
/// Until the first [`tick`](StreamProcessor::tick), record timestamps drive
/// the clock. From then on only ticks close windows, so quiet periods still
/// close and evaluate empty windows and a source clock running ahead of the
/// host cannot stall the grid.
pub struct StreamProcessor {
    config: ProcessorConfig,
    rules: Vec<Box<dyn WindowRule>>,
    scorer: Box<dyn AnomalyScorer>,
    handlers: Vec<AlertHandler>,
    current: Option<WindowAccumulator>,
    last_window: Option<WindowMetrics>,
    metrics: ProcessorMetrics,
    running: bool,
    /// Set by the first tick; records no longer move the clock
    ticking: bool,
}

impl StreamProcessor {
    /// Create a processor with the built-in rules
    ///
    /// The baseline scorer is installed when `enable_anomaly_scorer` is set,
    /// otherwise the no-op scorer.
    pub fn new(config: ProcessorConfig) -> Self {
        let scorer: Box<dyn AnomalyScorer> = if config.enable_anomaly_scorer {
            Box::new(BaselineScorer::new())
        } else {
            Box::new(NoopScorer)
        };
        Self::with_scorer(config, scorer)
    }

    pub fn with_scorer(config: ProcessorConfig, scorer: Box<dyn AnomalyScorer>) -> Self {
        let metrics = ProcessorMetrics {
            scorer: scorer.name().to_string(),
            ..ProcessorMetrics::default()
        };
        Self {
            rules: default_rules(&config),
            config,
            scorer,
            handlers: Vec::new(),
            current: None,
            last_window: None,
            metrics,
            running: false,
            ticking: false,
        }
    }

    /// Register an additional rule evaluated after the built-in ones
    pub fn add_rule(&mut self, rule: Box<dyn WindowRule>) {
        debug!("Registered window rule: {}", rule.name());
        self.rules.push(rule);
    }

    pub fn add_alert_handler(&mut self, handler: AlertHandler) {
        self.handlers.push(handler);
    }

    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            info!(
                "Stream processor started ({}s windows, {} rules, scorer: {})",
                self.config.window_seconds,
                self.rules.len(),
                self.scorer.name()
            );
        }
    }

    /// Stop accepting input and discard the open window
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.ticking = false;
            if let Some(open) = self.current.take() {
                debug!(
                    "Discarding open window with {} records",
                    open.total_records()
                );
            }
            info!("Stream processor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Feed one record
    ///
    /// Before the first tick, closes every window that ended at or before the
    /// record timestamp. The record is then counted in the open window,
    /// whether its timestamp falls before, inside or after it. A no-op while
    /// stopped.
    ///
    /// # Returns
    ///
    /// The alerts raised by windows closed on the way.
    pub fn process(&mut self, record: &LogRecord) -> Vec<Alert> {
        if !self.running {
            return Vec::new();
        }

        let alerts = if self.ticking && self.current.is_some() {
            Vec::new()
        } else {
            self.advance(record.timestamp)
        };

        if let Some(current) = self.current.as_mut() {
            current.add(record);
        }
        self.metrics.records_processed += 1;
        if record.level >= LogLevel::Error {
            self.metrics.error_count += 1;
        }
        alerts
    }

    /// Advance the window clock to `now` without a record
    ///
    /// The first tick hands the clock over to the caller. An open window
    /// that records placed after `now` is moved back to start at `now`.
    pub fn tick(&mut self, now: Timestamp) -> Vec<Alert> {
        if !self.running {
            return Vec::new();
        }

        if !self.ticking {
            self.ticking = true;
            let length = self.window_length();
            if let Some(current) = self.current.as_mut().filter(|c| c.start() > now) {
                debug!(
                    "Record clock is ahead of the wall clock, window moved to {}",
                    now.format("%H:%M:%S")
                );
                current.rebase(now, now + length);
            }
        }
        self.advance(now)
    }

    pub fn get_metrics(&self) -> ProcessorMetrics {
        ProcessorMetrics {
            current_window_records: self
                .current
                .as_ref()
                .map(|w| w.total_records())
                .unwrap_or(0),
            running: self.running,
            ..self.metrics.clone()
        }
    }

    /// Metrics of the most recently closed window
    pub fn last_window(&self) -> Option<&WindowMetrics> {
        self.last_window.as_ref()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn window_length(&self) -> Duration {
        Duration::seconds(self.config.window_seconds.max(1) as i64)
    }

    fn advance(&mut self, now: Timestamp) -> Vec<Alert> {
        let length = self.window_length();
        let mut alerts = Vec::new();

        let mut current = match self.current.take() {
            Some(current) => current,
            None => {
                self.current = Some(WindowAccumulator::new(now, now + length));
                return alerts;
            }
        };

        let mut closed = 0;
        while current.end() <= now {
            let mut next_start = current.end();
            alerts.extend(self.evaluate(current.finish()));
            closed += 1;

            if closed >= MAX_CATCH_UP_WINDOWS && next_start + length <= now {
                let slot = length.num_milliseconds();
                let skipped = (now - next_start).num_milliseconds() / slot;
                debug!("Skipping {} idle windows", skipped);
                next_start += Duration::milliseconds(skipped * slot);
            }
            current = WindowAccumulator::new(next_start, next_start + length);
        }

        self.current = Some(current);
        alerts
    }

    fn evaluate(&mut self, metrics: WindowMetrics) -> Vec<Alert> {
        debug!(
            "Window {} - {} closed: {} records, {} errors, {} crashes, {} ANRs",
            metrics.start.format("%H:%M:%S"),
            metrics.end.format("%H:%M:%S"),
            metrics.total_records,
            metrics.error_count(),
            metrics.crash_count,
            metrics.anr_count
        );

        self.metrics.windows_evaluated += 1;
        self.metrics.crash_count += metrics.crash_count;
        self.metrics.anr_count += metrics.anr_count;
        self.metrics.memory_count += metrics.memory_count;

        let mut alerts: Vec<Alert> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(&metrics))
            .collect();
        alerts.extend(self.scorer.score(&metrics));

        self.metrics.alerts_generated += alerts.len() as u64;
        for alert in &alerts {
            info!("Alert raised by {}: [{}] {}", alert.source, alert.level, alert.title);
            for handler in &self.handlers {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(alert))).is_err() {
                    error!("Alert handler panicked while handling '{}'", alert.title);
                }
            }
        }

        self.last_window = Some(metrics);
        alerts
    }
}
