use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use logwatch::collectors::CollectorMode;
use logwatch::config::Config;
use logwatch::error::ConfigError;
use logwatch::monitor::{MetricsSnapshot, Monitor};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// Command-line arguments for the log monitor
#[derive(Parser)]
#[command(
    name = "logwatch",
    about = "Real-time device log monitoring and alerting",
    long_about = "Streams a device log, aggregates records into fixed time windows, detects \
                  crashes, ANRs, memory pressure and error bursts, and routes alerts to \
                  console, file, email, chat and webhook channels."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Replay sample lines instead of reading a device
    #[arg(long, help = "Use the synthetic sample collector")]
    mock: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS", help = "Stop monitoring automatically")]
    duration: Option<u64>,

    /// Print metrics snapshots as JSON
    #[arg(long, help = "Print each metrics snapshot to stdout as one JSON line")]
    json_metrics: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if self.duration == Some(0) {
            return Err("Duration must be at least one second".to_string());
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    ///
    /// # Returns
    ///
    /// `Ok(Some(path_str))` if config is provided and valid UTF-8,
    /// `Ok(None)` if no config provided,
    /// `Err(String)` if config path contains invalid UTF-8
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Load configuration from file or use defaults
///
/// A missing or unreadable file and an invalid file both fall back to the
/// defaults, with a warning or an error in the log respectively.
fn load_config(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

fn print_metrics(snapshot: &MetricsSnapshot, as_json: bool) {
    if as_json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize metrics snapshot: {}", e),
        }
        return;
    }

    info!(
        "logs={} dropped={} windows={} alerts={} (suppressed dup={} rate={}) notifications sent={} failed={}",
        snapshot.monitor.total_logs_processed,
        snapshot.collector.dropped_records,
        snapshot.processor.windows_evaluated,
        snapshot.alerts.total_alerts,
        snapshot.alerts.suppressed_duplicates,
        snapshot.alerts.suppressed_rate_limited,
        snapshot.alerts.notifications_sent,
        snapshot.alerts.notifications_failed
    );
}

fn run(cli: Cli) -> Result<()> {
    cli.validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid arguments")?;

    let config_path = cli
        .config_path_str()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration path")?;

    let mut config = load_config(config_path);
    if cli.mock {
        config.collector.mode = CollectorMode::Mock;
    }

    let mut monitor = Monitor::new(config).context("Failed to initialize monitor")?;

    let json_metrics = cli.json_metrics;
    monitor.add_metrics_callback(move |snapshot| print_metrics(snapshot, json_metrics));

    if !monitor.is_running() {
        monitor.start().context("Failed to start monitor")?;
    }

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    match cli.duration {
        Some(seconds) => {
            info!("Monitoring for {} seconds. Press Ctrl+C to stop early.", seconds);
            match shutdown_receiver.recv_timeout(Duration::from_secs(seconds)) {
                Ok(()) => info!("Shutdown signal received"),
                Err(RecvTimeoutError::Timeout) => info!("Monitoring duration elapsed"),
                Err(RecvTimeoutError::Disconnected) => warn!("Shutdown channel disconnected"),
            }
        }
        None => {
            info!("Monitoring is running. Press Ctrl+C to stop.");
            if shutdown_receiver.recv().is_err() {
                warn!("Shutdown channel disconnected");
            }
        }
    }

    monitor.stop();
    print_metrics(&monitor.snapshot(), cli.json_metrics);
    info!("Monitor shutdown complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting logwatch");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn cli_with(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            mock: false,
            duration: None,
            json_metrics: false,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let file = NamedTempFile::new().unwrap();
        let cli = cli_with(Some(file.path().to_path_buf()));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = cli_with(Some(PathBuf::from("/nonexistent/config.toml")));

        // Should not fail - missing files are handled gracefully
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = TempDir::new().unwrap();
        let cli = cli_with(Some(dir.path().to_path_buf()));

        // Should fail - directories are not valid config files
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_zero_duration() {
        let mut cli = cli_with(None);
        cli.duration = Some(0);
        assert!(cli.validate().is_err());

        cli.duration = Some(5);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_config_path_str() {
        let cli = cli_with(Some(PathBuf::from("config.toml")));
        assert_eq!(cli.config_path_str().unwrap(), Some("config.toml"));
        assert_eq!(cli_with(None).config_path_str().unwrap(), None);
    }

    #[test]
    fn test_load_config_fallbacks() {
        assert_eq!(load_config(None), Config::default());
        assert_eq!(load_config(Some("/nonexistent/logwatch.toml")), Config::default());

        let mut invalid = NamedTempFile::new().unwrap();
        writeln!(invalid, "[processor]\nwindow_seconds = 0").unwrap();
        assert_eq!(
            load_config(invalid.path().to_str()),
            Config::default()
        );

        let mut valid = NamedTempFile::new().unwrap();
        writeln!(valid, "[processor]\nwindow_seconds = 10").unwrap();
        assert_eq!(load_config(valid.path().to_str()).processor.window_seconds, 10);
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from([
            "logwatch",
            "--mock",
            "--duration",
            "30",
            "--json-metrics",
            "-v",
        ]);
        assert!(cli.mock);
        assert!(cli.verbose);
        assert!(cli.json_metrics);
        assert_eq!(cli.duration, Some(30));
        assert!(cli.config.is_none());
    }
}
