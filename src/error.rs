use thiserror::Error;

/// Errors that can occur in log collectors
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,

    #[error("Log source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("Subprocess terminated unexpectedly: {0}")]
    SubprocessTerminated(String),

    #[error("Failed to parse output: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur when delivering notifications
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Channel '{channel}' is missing required setting '{setting}'")]
    MissingSetting {
        channel: &'static str,
        setting: &'static str,
    },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors reported by the monitor lifecycle
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitor is already running")]
    AlreadyRunning,

    #[error("Collector failed: {0}")]
    Collector(#[from] CollectorError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn {0} thread")]
    ThreadSpawn(&'static str),
}
