/// Error types for every component
pub mod error;

/// Log records, levels and alerts
pub mod events;

/// Configuration loading and validation
pub mod config;

/// Device log collection
pub mod collectors;

/// Windowed stream processing and rule evaluation
pub mod processor;

/// Alert policy and notification channels
pub mod alerts;

/// End-to-end lifecycle and status surface
pub mod monitor;

// Re-export commonly used types
pub use config::Config;
pub use error::{AlertError, CollectorError, ConfigError, MonitorError};
pub use events::{Alert, AlertLevel, LogLevel, LogRecord};
pub use monitor::{MetricsSnapshot, Monitor, MonitorStatus};
