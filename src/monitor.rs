//! End-to-end monitoring lifecycle
//!
//! The monitor owns one collector, one stream processor and one alert
//! manager and runs two threads of its own: the drainer, which moves
//! records from the collector's buffer through the processor and routes the
//! resulting alerts, and the metrics ticker, which drives deferred alert
//! dispatch and publishes periodic snapshots.

use crate::alerts::{
    Admission, AlertManager, AlertStatistics, ConsoleConfig, DueDispatch, NotificationSink,
    SinkSet,
};
use crate::collectors::{
    CollectorCounters, CollectorMode, CollectorStats, DeviceLogCollector, LogCollector,
    MockCollector, RecordBuffer,
};
use crate::config::Config;
use crate::error::MonitorError;
use crate::events::{Alert, LogRecord, Timestamp};
use crate::processor::{ProcessorMetrics, StreamProcessor};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bound on how long the drainer waits for a record, and on how stale the
/// processor's window clock may get
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Granularity of the metrics ticker's shutdown checks
const TICKER_SLICE: Duration = Duration::from_millis(50);

pub type LogCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;
pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;
pub type MetricsCallback = Arc<dyn Fn(&MetricsSnapshot) + Send + Sync>;

/// Monitor-level counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MonitorStats {
    pub total_logs_processed: u64,
    pub total_alerts_generated: u64,
    pub callback_failures: u64,
    pub uptime_seconds: u64,
}

/// One consistent view over every component
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: Timestamp,
    pub monitor: MonitorStats,
    pub collector: CollectorStats,
    pub processor: ProcessorMetrics,
    pub alerts: AlertStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub collector_running: bool,
    pub processor_running: bool,
    pub metrics: MetricsSnapshot,
}

#[derive(Default)]
struct MonitorCounters {
    total_logs_processed: AtomicU64,
    total_alerts_generated: AtomicU64,
    callback_failures: AtomicU64,
    started_at: Mutex<Option<Instant>>,
}

impl MonitorCounters {
    fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            total_logs_processed: self.total_logs_processed.load(Ordering::Relaxed),
            total_alerts_generated: self.total_alerts_generated.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            uptime_seconds: lock(&self.started_at)
                .map(|started| started.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}

#[derive(Default)]
struct Observers {
    log: Mutex<Vec<LogCallback>>,
    alert: Mutex<Vec<AlertCallback>>,
    metrics: Mutex<Vec<MetricsCallback>>,
}

/// State shared between the monitor handle and its threads
///
/// Sinks sit behind their own lock so that notification I/O never holds the
/// alert manager.
struct Shared {
    running: AtomicBool,
    processor: Mutex<StreamProcessor>,
    alerts: Mutex<AlertManager>,
    sinks: Mutex<SinkSet>,
    collector_counters: Arc<CollectorCounters>,
    records: Arc<RecordBuffer>,
    counters: MonitorCounters,
    observers: Observers,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Run every callback, counting the ones that panic
    fn notify<T: ?Sized + 'static>(
        &self,
        callbacks: &Mutex<Vec<Arc<dyn Fn(&T) + Send + Sync>>>,
        value: &T,
        kind: &str,
    ) {
        let callbacks: Vec<_> = lock(callbacks).clone();
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                error!("A {} callback panicked", kind);
            }
        }
    }

    fn handle_record(&self, record: &LogRecord) {
        self.counters.total_logs_processed.fetch_add(1, Ordering::Relaxed);
        self.notify(&self.observers.log, record, "log");

        let alerts = lock(&self.processor).process(record);
        for alert in alerts {
            self.handle_alert(alert);
        }
    }

    fn advance_clock(&self, now: Timestamp) {
        let alerts = lock(&self.processor).tick(now);
        for alert in alerts {
            self.handle_alert(alert);
        }
    }

    fn handle_alert(&self, alert: Alert) {
        self.counters.total_alerts_generated.fetch_add(1, Ordering::Relaxed);
        self.notify(&self.observers.alert, &alert, "alert");

        let title = alert.title.clone();
        let admission = lock(&self.alerts).admit(alert);
        match admission {
            Admission::Dispatch(dispatch) => self.deliver(&dispatch),
            other => debug!("Alert '{}' handled: {:?}", title, other),
        }
    }

    fn deliver(&self, dispatch: &DueDispatch) {
        let delivery = lock(&self.sinks).deliver(&dispatch.alert, &dispatch.channels);
        lock(&self.alerts).record_delivery(delivery);
    }

    fn collector_stats(&self) -> CollectorStats {
        let mut stats = self.collector_counters.snapshot();
        stats.dropped_records = self.records.dropped();
        stats
    }

    /// Each component lock is taken and released on its own
    fn snapshot(&self) -> MetricsSnapshot {
        let processor = lock(&self.processor).get_metrics();
        let alerts = lock(&self.alerts).get_alert_statistics();
        MetricsSnapshot {
            timestamp: Utc::now(),
            monitor: self.counters.snapshot(),
            collector: self.collector_stats(),
            processor,
            alerts,
        }
    }

    fn drainer_loop(&self) {
        info!("Drainer thread started");
        // The wall clock owns the window grid from the first record on
        self.advance_clock(Utc::now());
        let mut last_tick = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            if let Some(record) = self.records.recv_timeout(DRAIN_POLL_INTERVAL) {
                self.handle_record(&record);
            }

            if last_tick.elapsed() >= DRAIN_POLL_INTERVAL {
                self.advance_clock(Utc::now());
                last_tick = Instant::now();
            }
        }

        info!("Drainer thread stopped");
    }

    fn metrics_loop(&self, interval: Duration) {
        info!("Metrics thread started");

        'ticker: loop {
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if !self.running.load(Ordering::SeqCst) {
                    break 'ticker;
                }
                thread::sleep(TICKER_SLICE.min(deadline.saturating_duration_since(Instant::now())));
            }

            let due = lock(&self.alerts).due(Utc::now());
            for dispatch in &due {
                self.deliver(dispatch);
            }
            if !due.is_empty() {
                debug!("Dispatched {} deferred alert(s)", due.len());
            }

            let snapshot = self.snapshot();
            self.notify(&self.observers.metrics, &snapshot, "metrics");
        }

        info!("Metrics thread stopped");
    }
}

/// Owns the collector, processor and alert manager of one monitoring session
pub struct Monitor {
    collector: Box<dyn LogCollector>,
    shared: Arc<Shared>,
    metrics_interval: Duration,
    threads: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Build a monitor with the collector selected by `collector.mode`
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` for an invalid configuration, or the
    /// start error when `monitor.auto_start` is set and starting fails.
    pub fn new(config: Config) -> Result<Self, MonitorError> {
        let collector: Box<dyn LogCollector> = match config.collector.mode {
            CollectorMode::Device => Box::new(DeviceLogCollector::new(config.collector.clone())),
            CollectorMode::Mock => Box::new(MockCollector::new(config.collector.clone())),
        };
        Self::with_collector(config, collector)
    }

    /// Build a monitor around an existing collector
    ///
    /// # Errors
    ///
    /// Same as [`Monitor::new`].
    pub fn with_collector(
        config: Config,
        collector: Box<dyn LogCollector>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        let mut alerts_config = config.alerts.clone();
        if alerts_config.channels.is_empty() {
            info!("No notification channels configured, enabling console");
            alerts_config.channels.console = Some(ConsoleConfig::default());
        }

        let mut alerts = AlertManager::new(alerts_config)?;
        let sinks = alerts.take_sinks();

        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            processor: Mutex::new(StreamProcessor::new(config.processor.clone())),
            alerts: Mutex::new(alerts),
            sinks: Mutex::new(sinks),
            collector_counters: collector.counters(),
            records: collector.records(),
            counters: MonitorCounters::default(),
            observers: Observers::default(),
        });

        let mut monitor = Self {
            collector,
            shared,
            metrics_interval: config.monitor.metrics_interval(),
            threads: Vec::new(),
        };

        if config.monitor.auto_start {
            monitor.start()?;
        }
        Ok(monitor)
    }

    /// Start the processor, then the collector, then the monitor threads
    ///
    /// Nothing is left running when any step fails.
    ///
    /// # Errors
    ///
    /// `MonitorError::AlreadyRunning` on a second call, the collector's start
    /// error, or `MonitorError::ThreadSpawn`.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }
        *lock(&self.shared.counters.started_at) = Some(Instant::now());

        lock(&self.shared.processor).start();

        if let Err(e) = self.collector.start() {
            error!("Collector failed to start: {}", e);
            self.shutdown();
            return Err(e.into());
        }

        let drainer = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("logwatch-drainer".to_string())
            .spawn(move || drainer.drainer_loop());
        match spawned {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                error!("Failed to spawn drainer thread: {}", e);
                self.shutdown();
                return Err(MonitorError::ThreadSpawn("drainer"));
            }
        }

        let ticker = Arc::clone(&self.shared);
        let interval = self.metrics_interval;
        let spawned = thread::Builder::new()
            .name("logwatch-metrics".to_string())
            .spawn(move || ticker.metrics_loop(interval));
        match spawned {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                error!("Failed to spawn metrics thread: {}", e);
                self.shutdown();
                return Err(MonitorError::ThreadSpawn("metrics"));
            }
        }

        info!("Monitor started");
        Ok(())
    }

    /// Stop the collector, then the processor, and join the monitor threads
    ///
    /// Calling `stop` on a stopped monitor does nothing.
    pub fn stop(&mut self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown();
        info!("Monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn add_log_callback(&self, callback: impl Fn(&LogRecord) + Send + Sync + 'static) {
        lock(&self.shared.observers.log).push(Arc::new(callback));
    }

    pub fn add_alert_callback(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) {
        lock(&self.shared.observers.alert).push(Arc::new(callback));
    }

    pub fn add_metrics_callback(
        &self,
        callback: impl Fn(&MetricsSnapshot) + Send + Sync + 'static,
    ) {
        lock(&self.shared.observers.metrics).push(Arc::new(callback));
    }

    /// Route alerts for the sink's channel to `sink` instead of the configured one
    pub fn register_sink(&self, sink: Box<dyn NotificationSink>) {
        lock(&self.shared.sinks).register(sink);
    }

    pub fn get_status(&self) -> MonitorStatus {
        let processor_running = lock(&self.shared.processor).is_running();
        let metrics = self.shared.snapshot();
        MonitorStatus {
            running: self.is_running(),
            collector_running: self.shared.collector_counters.is_running(),
            processor_running,
            metrics,
        }
    }

    /// The newest `limit` alerts seen by the alert manager, oldest first
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<Alert> {
        lock(&self.shared.alerts).recent_alerts(limit)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.shared.snapshot()
    }

    fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);

        if self.collector.is_running() {
            if let Err(e) = self.collector.stop() {
                error!("Failed to stop collector: {}", e);
            }
        }
        lock(&self.shared.processor).stop();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Monitor thread panicked");
            }
        }

        let discarded = lock(&self.shared.alerts).discard_pending();
        if discarded > 0 {
            warn!("Discarded {} deferred escalation(s) that had not come due", discarded);
        }
        *lock(&self.shared.counters.started_at) = None;
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
