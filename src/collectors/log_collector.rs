use crate::collectors::{
    CollectorConfig, CollectorCounters, LineIngestor, LogCollector, RecordBuffer,
};
use crate::error::CollectorError;
use log::{debug, error, info, warn};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long the source gets to exit after SIGTERM before it is killed
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Poll interval of the non-blocking read loop
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Slice used when sleeping so that `stop()` is observed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Size of one pipe read
const READ_CHUNK: usize = 4096;

/// Longest line kept while waiting for its newline
const MAX_LINE_BYTES: usize = 16 * READ_CHUNK;

/// Collector backed by a device log bridge subprocess
///
/// Spawns `adb logcat -v threadtime` (or a configured command) and reads its
/// standard output line by line. Parsed records are filtered and pushed into
/// a bounded [`RecordBuffer`]. When the source exits or its pipe fails the
/// collector waits `reconnect_interval` and launches it again, for as long as
/// it stays running.
pub struct DeviceLogCollector {
    config: CollectorConfig,
    buffer: Arc<RecordBuffer>,
    counters: Arc<CollectorCounters>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceLogCollector {
    /// Create a new collector
    ///
    /// # Arguments
    ///
    /// * `config` - Source selection, filters and buffer sizing
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use logwatch::collectors::{CollectorConfig, DeviceLogCollector, LogCollector};
    ///
    /// let mut collector = DeviceLogCollector::new(CollectorConfig::default());
    /// collector.start().expect("no device attached");
    /// ```
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            buffer: Arc::new(RecordBuffer::new(config.max_buffer_size)),
            counters: Arc::new(CollectorCounters::new()),
            thread_handle: None,
            config,
        }
    }

    /// Resolve the argv of the source process and the id stamped on its records
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::SourceUnavailable` if the bridge reports no
    /// matching device.
    fn resolve_source(&self) -> Result<(Vec<String>, String), CollectorError> {
        if let Some(command) = self.config.command.as_ref().filter(|argv| !argv.is_empty()) {
            let source_id = self
                .config
                .source_id
                .clone()
                .unwrap_or_else(|| command[0].clone());
            return Ok((command.clone(), source_id));
        }

        let devices = Self::probe_devices(self.config.io_timeout())?;
        let serial = match &self.config.source_id {
            Some(wanted) if devices.iter().any(|d| d == wanted) => wanted.clone(),
            Some(wanted) => {
                return Err(CollectorError::SourceUnavailable(format!(
                    "device {} is not attached",
                    wanted
                )))
            }
            None => devices.into_iter().next().ok_or_else(|| {
                CollectorError::SourceUnavailable("no attached device".to_string())
            })?,
        };

        Ok((Self::logcat_command(&self.config, &serial), serial))
    }

    /// Build `adb -s SERIAL logcat [-b BUFFER]... -v threadtime *:LEVEL`
    fn logcat_command(config: &CollectorConfig, serial: &str) -> Vec<String> {
        let mut argv = vec![
            "adb".to_string(),
            "-s".to_string(),
            serial.to_string(),
            "logcat".to_string(),
        ];
        for buffer in &config.buffers {
            argv.push("-b".to_string());
            argv.push(buffer.clone());
        }
        argv.push("-v".to_string());
        argv.push("threadtime".to_string());
        argv.push(format!("*:{}", config.min_level.as_char()));
        argv
    }

    /// Ask the bridge which devices are attached, bounded by `timeout`
    fn probe_devices(timeout: Duration) -> Result<Vec<String>, CollectorError> {
        let mut child = Command::new("adb")
            .arg("devices")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CollectorError::SourceUnavailable(format!("adb: {}", e)))?;

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait()? {
                Some(_) => break,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CollectorError::SourceUnavailable(format!(
                        "adb devices did not answer within {:?}",
                        timeout
                    )));
                }
                None => thread::sleep(READ_POLL_INTERVAL),
            }
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output)?;
        }
        Ok(parse_device_list(&output))
    }

    /// Spawn the source process with a non-blocking stdout
    fn spawn_source(argv: &[String]) -> Result<Child, CollectorError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CollectorError::SubprocessSpawn("empty command".to_string()))?;
        debug!("Spawning log source: {}", argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", program, e)))?;

        // Non-blocking reads let the loop notice shutdown while the source is quiet
        if let Some(ref mut stdout) = child.stdout {
            #[cfg(unix)]
            {
                use std::os::unix::io::AsRawFd;
                let fd = stdout.as_raw_fd();
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
        }

        Ok(child)
    }

    /// Main collector thread function
    ///
    /// Reads from the current source until it ends, then relaunches it after
    /// the reconnect interval. Retries are unbounded while running.
    fn collector_thread(
        child: mpsc::Receiver<Child>,
        argv: Vec<String>,
        ingestor: LineIngestor,
        counters: Arc<CollectorCounters>,
        reconnect_interval: Duration,
    ) {
        let Ok(mut child) = child.recv() else {
            return;
        };

        'session: loop {
            let result = Self::process_source_output(&mut child, &ingestor, &counters);
            Self::terminate_child(&mut child);

            if !counters.is_running() {
                break;
            }

            match result {
                Ok(()) => warn!("Log source exited, reconnecting in {:?}", reconnect_interval),
                Err(e) => error!(
                    "Error reading log source: {}, reconnecting in {:?}",
                    e, reconnect_interval
                ),
            }
            counters.record_error();

            child = loop {
                if !sleep_while_running(reconnect_interval, &counters) {
                    break 'session;
                }
                match Self::spawn_source(&argv) {
                    Ok(child) => {
                        counters.record_launch();
                        info!("Log source relaunched (launch #{})", counters.launches());
                        break child;
                    }
                    Err(e) => {
                        counters.record_error();
                        error!("Failed to relaunch log source: {}", e);
                    }
                }
            };
        }

        info!("Log collector thread finished");
    }

    /// Read output from the source until EOF, an I/O error or shutdown
    ///
    /// A line longer than `MAX_LINE_BYTES` is counted as unparseable and
    /// skipped up to its newline.
    fn process_source_output(
        child: &mut Child,
        ingestor: &LineIngestor,
        counters: &CollectorCounters,
    ) -> Result<(), CollectorError> {
        let mut stdout = child.stdout.take().ok_or_else(|| {
            CollectorError::SubprocessTerminated("no stdout available".to_string())
        })?;

        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut discarding = false;

        loop {
            if !counters.is_running() {
                debug!("Stopping log processing due to shutdown signal");
                return Ok(());
            }

            match stdout.read(&mut chunk) {
                Ok(0) => {
                    if !pending.is_empty() && !discarding {
                        ingestor.ingest(&String::from_utf8_lossy(&pending));
                    }
                    debug!("Log source closed stdout");
                    return Ok(());
                }
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        if discarding {
                            discarding = false;
                            continue;
                        }
                        ingestor.ingest(&String::from_utf8_lossy(&line));
                    }
                    if pending.len() > MAX_LINE_BYTES {
                        if !discarding {
                            ingestor.reject_oversized(pending.len());
                            discarding = true;
                        }
                        pending.clear();
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(READ_POLL_INTERVAL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CollectorError::IoError(e)),
            }
        }
    }

    /// Two-stage shutdown: SIGTERM, then kill after the grace period
    fn terminate_child(child: &mut Child) {
        if let Ok(Some(status)) = child.try_wait() {
            debug!("Log source already exited with {}", status);
            return;
        }

        #[cfg(unix)]
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }

        let deadline = Instant::now() + TERMINATION_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(READ_POLL_INTERVAL),
                Err(e) => {
                    warn!("Failed to check log source status: {}", e);
                    break;
                }
            }
        }

        warn!("Log source ignored SIGTERM, killing it");
        if let Err(e) = child.kill() {
            warn!("Failed to kill log source: {}", e);
        }
        let _ = child.wait();
    }
}

impl LogCollector for DeviceLogCollector {
    /// Launch the source and the read loop
    ///
    /// The first launch happens synchronously so that a missing bridge or
    /// device is reported to the caller instead of being retried.
    fn start(&mut self) -> Result<(), CollectorError> {
        if self.counters.is_running() {
            return Err(CollectorError::AlreadyRunning);
        }

        let (argv, source_id) = self.resolve_source()?;
        let mut child = Self::spawn_source(&argv)?;

        if !self.counters.mark_started() {
            Self::terminate_child(&mut child);
            return Err(CollectorError::AlreadyRunning);
        }
        self.counters.record_launch();

        let ingestor = LineIngestor::new(
            &self.config,
            source_id.clone(),
            Arc::clone(&self.buffer),
            Arc::clone(&self.counters),
        );
        let counters = Arc::clone(&self.counters);
        let reconnect_interval = self.config.reconnect_interval();
        let thread_argv = argv.clone();

        // The child is handed over only once the thread exists
        let (child_sender, child_receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("logwatch-collector".to_string())
            .spawn(move || {
                Self::collector_thread(
                    child_receiver,
                    thread_argv,
                    ingestor,
                    counters,
                    reconnect_interval,
                );
            });

        match spawned {
            Ok(handle) => {
                if let Err(mpsc::SendError(mut child)) = child_sender.send(child) {
                    Self::terminate_child(&mut child);
                }
                self.thread_handle = Some(handle);
                info!("Device log collector started for {}: {}", source_id, argv.join(" "));
                Ok(())
            }
            Err(e) => {
                Self::terminate_child(&mut child);
                self.counters.mark_stopped();
                Err(CollectorError::SubprocessSpawn(format!(
                    "collector thread: {}",
                    e
                )))
            }
        }
    }

    fn stop(&mut self) -> Result<(), CollectorError> {
        let was_running = self.counters.is_running();
        self.counters.mark_stopped();

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| {
                CollectorError::SubprocessTerminated("Failed to join collector thread".to_string())
            })?;
        }

        if was_running {
            info!("Device log collector stopped");
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

impl Drop for DeviceLogCollector {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

/// Extract serials in state `device` from `adb devices` output
pub(crate) fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Sleep for `duration` in short slices, returning `false` as soon as the
/// collector is stopped
pub(crate) fn sleep_while_running(duration: Duration, counters: &CollectorCounters) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !counters.is_running() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    counters.is_running()
}
