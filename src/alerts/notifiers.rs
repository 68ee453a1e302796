//! Notification sinks for the alert channels
//!
//! Every sink renders an alert for one channel and reports success or
//! failure. Sinks never retry; the alert manager logs failures and moves on
//! to the next channel.

use crate::error::AlertError;
use crate::events::{Alert, AlertLevel};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

/// Timeout for HTTP and SMTP deliveries
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Channels an escalation rule can route alerts to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Console,
    File,
    Email,
    #[serde(alias = "slack")]
    Chat,
    Webhook,
}

impl NotificationChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Console => "console",
            NotificationChannel::File => "file",
            NotificationChannel::Email => "email",
            NotificationChannel::Chat => "chat",
            NotificationChannel::Webhook => "webhook",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivers alerts to one channel
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send {
    fn channel(&self) -> NotificationChannel;

    /// Deliver one alert
    ///
    /// # Errors
    ///
    /// Any delivery failure. The caller logs it and continues with other channels.
    fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub max_description_length: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_description_length: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("alerts.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub to_emails: Vec<String>,
    /// Use an implicit-TLS relay instead of a plain connection
    pub use_tls: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_server: "localhost".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            from_email: "alerts@example.com".to_string(),
            to_emails: vec!["admin@example.com".to_string()],
            use_tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Overrides the webhook's default channel
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Per-channel settings; an absent section leaves the channel unconfigured
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelsConfig {
    pub console: Option<ConsoleConfig>,
    pub file: Option<FileConfig>,
    pub email: Option<EmailConfig>,
    #[serde(alias = "slack")]
    pub chat: Option<ChatConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl ChannelsConfig {
    /// True when no channel section is present at all
    pub fn is_empty(&self) -> bool {
        self.console.is_none()
            && self.file.is_none()
            && self.email.is_none()
            && self.chat.is_none()
            && self.webhook.is_none()
    }

    /// Channels that are configured and enabled
    pub fn enabled_channels(&self) -> Vec<NotificationChannel> {
        let mut channels = Vec::new();
        if self.console.as_ref().is_some_and(|c| c.enabled) {
            channels.push(NotificationChannel::Console);
        }
        if self.file.as_ref().is_some_and(|c| c.enabled) {
            channels.push(NotificationChannel::File);
        }
        if self.email.as_ref().is_some_and(|c| c.enabled) {
            channels.push(NotificationChannel::Email);
        }
        if self.chat.as_ref().is_some_and(|c| c.enabled) {
            channels.push(NotificationChannel::Chat);
        }
        if self.webhook.as_ref().is_some_and(|c| c.enabled) {
            channels.push(NotificationChannel::Webhook);
        }
        channels
    }
}

/// Build a sink for every configured and enabled channel
///
/// # Errors
///
/// Returns an error if an HTTP client or async runtime cannot be created.
pub fn build_sinks(config: &ChannelsConfig) -> Result<Vec<Box<dyn NotificationSink>>, AlertError> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();

    if let Some(console) = config.console.as_ref().filter(|c| c.enabled) {
        sinks.push(Box::new(ConsoleSink::new(console.clone())));
    }
    if let Some(file) = config.file.as_ref().filter(|c| c.enabled) {
        sinks.push(Box::new(FileSink::new(file.clone())));
    }
    if let Some(email) = config.email.as_ref().filter(|c| c.enabled) {
        sinks.push(Box::new(EmailSink::new(email.clone())?));
    }
    if let Some(chat) = config.chat.as_ref().filter(|c| c.enabled) {
        sinks.push(Box::new(ChatSink::new(chat.clone())?));
    }
    if let Some(webhook) = config.webhook.as_ref().filter(|c| c.enabled) {
        sinks.push(Box::new(WebhookSink::new(webhook.clone())?));
    }

    Ok(sinks)
}

/// Per-channel results of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// The sinks of the enabled channels, at most one per channel
///
/// Kept apart from the alert manager's policy state so that slow channels
/// never block readers of that state.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl SinkSet {
    /// # Errors
    ///
    /// Same as [`build_sinks`].
    pub fn from_config(config: &ChannelsConfig) -> Result<Self, AlertError> {
        Ok(Self {
            sinks: build_sinks(config)?,
        })
    }

    /// Add a sink, replacing any existing sink for the same channel
    pub fn register(&mut self, sink: Box<dyn NotificationSink>) {
        let channel = sink.channel();
        self.sinks.retain(|existing| existing.channel() != channel);
        self.sinks.push(sink);
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.sinks.iter().map(|sink| sink.channel()).collect()
    }

    /// Send `alert` to each of `channels`
    ///
    /// Channels without a sink are skipped. A failing channel is logged and
    /// does not stop delivery to the rest.
    pub fn deliver(&self, alert: &Alert, channels: &[NotificationChannel]) -> Delivery {
        let mut delivery = Delivery::default();

        for channel in channels {
            let Some(sink) = self.sinks.iter().find(|sink| sink.channel() == *channel) else {
                debug!("Channel '{}' is not configured, skipping", channel);
                continue;
            };

            match sink.send(alert) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    error!(
                        "Failed to send {} notification for '{}': {}",
                        channel, alert.title, e
                    );
                    delivery.failed += 1;
                }
            }
        }

        delivery
    }
}

/// Truncate text to a maximum byte length on a UTF-8 character boundary
///
/// Truncated text ends with `...` and never exceeds `max_length` bytes.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}

/// Alert fields shared by the file and webhook payloads
fn alert_fields(alert: &Alert) -> Value {
    json!({
        "id": alert.id,
        "level": alert.level,
        "title": alert.title,
        "description": alert.description,
        "timestamp": alert.timestamp.to_rfc3339(),
        "source": alert.source,
        "metadata": alert.metadata,
    })
}

/// Prints a human-readable block to standard output
pub struct ConsoleSink {
    config: ConsoleConfig,
}

impl ConsoleSink {
    pub fn new(config: ConsoleConfig) -> Self {
        Self { config }
    }

    pub fn format_alert(&self, alert: &Alert) -> String {
        let marker = match alert.level {
            AlertLevel::Critical => "!!!",
            AlertLevel::Error => "!!",
            AlertLevel::Warning => "!",
            AlertLevel::Info => "i",
        };

        let mut text = format!(
            "[{}] {} {}\n  Time:   {}\n  Source: {}\n  {}",
            alert.level.as_str().to_uppercase(),
            marker,
            alert.title,
            alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            alert.source,
            truncate_text(&alert.description, self.config.max_description_length)
        );

        for (key, value) in &alert.metadata {
            text.push_str(&format!("\n  {}: {}", key, value));
        }
        text
    }
}

impl NotificationSink for ConsoleSink {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Console
    }

    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", self.format_alert(alert))?;
        Ok(())
    }
}

/// Appends one JSON object per alert to a file
pub struct FileSink {
    config: FileConfig,
}

impl FileSink {
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    pub fn render(alert: &Alert) -> Result<String, AlertError> {
        let record = json!({
            "timestamp": alert.timestamp.to_rfc3339(),
            "level": alert.level,
            "title": alert.title,
            "description": alert.description,
            "source": alert.source,
            "metadata": alert.metadata,
        });
        Ok(serde_json::to_string(&record)?)
    }
}

impl NotificationSink for FileSink {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::File
    }

    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let line = Self::render(alert)?;

        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)?;
        writeln!(file, "{}", line)?;
        debug!("Alert written to {}", self.config.path.display());
        Ok(())
    }
}

/// Blocking JSON poster for sinks called from worker threads
struct HttpPoster {
    client: Client,
    runtime: Runtime,
}

impl HttpPoster {
    fn new() -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            runtime: current_thread_runtime()?,
        })
    }

    fn post_json(
        &self,
        url: &str,
        payload: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), AlertError> {
        self.runtime.block_on(async {
            let mut request = self.client.post(url).json(payload);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AlertError::NotificationFailed(format!(
                    "{} answered {}: {}",
                    url,
                    status,
                    truncate_text(&body, 200)
                )));
            }
            Ok::<(), AlertError>(())
        })
    }
}

fn current_thread_runtime() -> Result<Runtime, AlertError> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Posts a color-coded attachment to a chat webhook
pub struct ChatSink {
    config: ChatConfig,
    http: HttpPoster,
}

impl ChatSink {
    pub fn new(config: ChatConfig) -> Result<Self, AlertError> {
        Ok(Self {
            config,
            http: HttpPoster::new()?,
        })
    }

    fn color(level: AlertLevel) -> &'static str {
        match level {
            AlertLevel::Critical => "danger",
            AlertLevel::Error | AlertLevel::Warning => "warning",
            AlertLevel::Info => "good",
        }
    }

    pub fn payload(&self, alert: &Alert) -> Value {
        let mut payload = json!({
            "attachments": [{
                "color": Self::color(alert.level),
                "title": alert.title,
                "text": alert.description,
                "fields": [
                    {"title": "Level", "value": alert.level.as_str().to_uppercase(), "short": true},
                    {"title": "Source", "value": alert.source, "short": true},
                    {"title": "Timestamp", "value": alert.timestamp.to_rfc3339(), "short": true}
                ],
                "ts": alert.timestamp.timestamp()
            }]
        });

        if let Some(channel) = &self.config.channel {
            payload["channel"] = json!(channel);
        }
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        payload
    }
}

impl NotificationSink for ChatSink {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Chat
    }

    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let url = self
            .config
            .webhook_url
            .as_deref()
            .ok_or(AlertError::MissingSetting {
                channel: "chat",
                setting: "webhook_url",
            })?;

        self.http.post_json(url, &self.payload(alert), &BTreeMap::new())?;
        info!("Chat alert sent: {}", alert.title);
        Ok(())
    }
}

/// Posts `{"alert": {...}}` to a generic HTTP endpoint
pub struct WebhookSink {
    config: WebhookConfig,
    http: HttpPoster,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Result<Self, AlertError> {
        Ok(Self {
            config,
            http: HttpPoster::new()?,
        })
    }

    pub fn payload(alert: &Alert) -> Value {
        json!({ "alert": alert_fields(alert) })
    }
}

impl NotificationSink for WebhookSink {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Webhook
    }

    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let url = self.config.url.as_deref().ok_or(AlertError::MissingSetting {
            channel: "webhook",
            setting: "url",
        })?;

        self.http
            .post_json(url, &Self::payload(alert), &self.config.headers)?;
        info!("Webhook alert sent: {}", alert.title);
        Ok(())
    }
}

/// Sends a plain-text message over SMTP
pub struct EmailSink {
    config: EmailConfig,
    runtime: Runtime,
}

impl EmailSink {
    pub fn new(config: EmailConfig) -> Result<Self, AlertError> {
        Ok(Self {
            config,
            runtime: current_thread_runtime()?,
        })
    }

    pub fn subject(alert: &Alert) -> String {
        format!("[{}] {}", alert.level.as_str().to_uppercase(), alert.title)
    }

    pub fn body(alert: &Alert) -> Result<String, AlertError> {
        Ok(format!(
            "Alert Details:\n\
             - Level: {}\n\
             - Title: {}\n\
             - Description: {}\n\
             - Timestamp: {}\n\
             - Source: {}\n\n\
             Metadata:\n{}\n",
            alert.level.as_str().to_uppercase(),
            alert.title,
            alert.description,
            alert.timestamp.to_rfc3339(),
            alert.source,
            serde_json::to_string_pretty(&alert.metadata)?
        ))
    }

    fn message(&self, alert: &Alert) -> Result<Message, AlertError> {
        if self.config.to_emails.is_empty() {
            return Err(AlertError::MissingSetting {
                channel: "email",
                setting: "to_emails",
            });
        }

        let from = self.config.from_email.parse::<Mailbox>().map_err(|e| {
            AlertError::NotificationFailed(format!(
                "invalid from address '{}': {}",
                self.config.from_email, e
            ))
        })?;

        let mut builder = Message::builder()
            .from(from)
            .subject(Self::subject(alert))
            .header(ContentType::TEXT_PLAIN);
        for address in &self.config.to_emails {
            let to = address.parse::<Mailbox>().map_err(|e| {
                AlertError::NotificationFailed(format!("invalid recipient '{}': {}", address, e))
            })?;
            builder = builder.to(to);
        }

        builder
            .body(Self::body(alert)?)
            .map_err(|e| AlertError::NotificationFailed(format!("failed to build email: {}", e)))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, AlertError> {
        let mut builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_server).map_err(|e| {
                AlertError::NotificationFailed(format!("SMTP relay setup failed: {}", e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_server)
        };

        builder = builder
            .port(self.config.smtp_port)
            .timeout(Some(DELIVERY_TIMEOUT));
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

impl NotificationSink for EmailSink {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let message = self.message(alert)?;
        let mailer = self.transport()?;

        self.runtime
            .block_on(mailer.send(message))
            .map_err(|e| AlertError::NotificationFailed(format!("SMTP delivery failed: {}", e)))?;
        info!("Email alert sent: {}", alert.title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    fn sample_alert() -> Alert {
        Alert::new(
            AlertLevel::Critical,
            "Application crash detected",
            "1 crash(es) detected",
            "crash_rule",
        )
        .with_metadata("crash_count", 1)
    }

    /// Accept one HTTP request, answer with `status`, and hand back the request body
    fn one_shot_server(status: u16) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
            }

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            let response = format!(
                "HTTP/1.1 {} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                status
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            String::from_utf8(body).unwrap()
        });

        (url, handle)
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("hello world", 8), "hello...");

        // Multi-byte characters are never split
        let truncated = truncate_text("ééééé", 6);
        assert!(truncated.len() <= 6);
        assert_eq!(truncated, "é...");
    }

    #[test]
    fn test_console_format() {
        let sink = ConsoleSink::new(ConsoleConfig {
            enabled: true,
            max_description_length: 10,
        });
        let alert = Alert::new(AlertLevel::Warning, "High error rate", "x".repeat(50), "error_rate_rule");
        let text = sink.format_alert(&alert);

        assert!(text.starts_with("[WARNING] ! High error rate"));
        assert!(text.contains("Source: error_rate_rule"));
        assert!(text.contains("xxxxxxx..."));
        assert!(sink.send(&alert).is_ok());
    }

    #[test]
    fn test_file_sink_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("alerts.jsonl");
        let sink = FileSink::new(FileConfig {
            enabled: true,
            path: path.clone(),
        });

        sink.send(&sample_alert()).unwrap();
        sink.send(&sample_alert()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["level"], "critical");
        assert_eq!(record["title"], "Application crash detected");
        assert_eq!(record["source"], "crash_rule");
        assert_eq!(record["metadata"]["crash_count"], 1);
        assert!(record.get("timestamp").is_some());
        assert!(record.get("description").is_some());
    }

    #[test]
    fn test_webhook_posts_alert_envelope() {
        let (url, server) = one_shot_server(200);
        let mut headers = BTreeMap::new();
        headers.insert("X-Token".to_string(), "secret".to_string());
        let sink = WebhookSink::new(WebhookConfig {
            enabled: true,
            url: Some(url),
            headers,
        })
        .unwrap();

        let alert = sample_alert();
        sink.send(&alert).unwrap();

        let body: Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["alert"]["id"], alert.id.as_str());
        assert_eq!(body["alert"]["level"], "critical");
        assert_eq!(body["alert"]["metadata"]["crash_count"], 1);
    }

    #[test]
    fn test_non_success_status_is_failure() {
        let (url, server) = one_shot_server(500);
        let sink = WebhookSink::new(WebhookConfig {
            enabled: true,
            url: Some(url),
            headers: BTreeMap::new(),
        })
        .unwrap();

        match sink.send(&sample_alert()) {
            Err(AlertError::NotificationFailed(message)) => assert!(message.contains("500")),
            other => panic!("Unexpected result: {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint_is_failure() {
        // Bind and drop a listener to find a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let sink = ChatSink::new(ChatConfig {
            enabled: true,
            webhook_url: Some(format!("http://127.0.0.1:{}/", port)),
            channel: None,
            username: None,
        })
        .unwrap();

        assert!(matches!(sink.send(&sample_alert()), Err(AlertError::HttpError(_))));
    }

    #[test]
    fn test_missing_settings() {
        let chat = ChatSink::new(ChatConfig {
            enabled: true,
            webhook_url: None,
            channel: None,
            username: None,
        })
        .unwrap();
        assert!(matches!(
            chat.send(&sample_alert()),
            Err(AlertError::MissingSetting { channel: "chat", .. })
        ));

        let email = EmailSink::new(EmailConfig {
            to_emails: Vec::new(),
            ..EmailConfig::default()
        })
        .unwrap();
        assert!(matches!(
            email.send(&sample_alert()),
            Err(AlertError::MissingSetting { channel: "email", .. })
        ));
    }

    #[test]
    fn test_chat_payload_colors() {
        let sink = ChatSink::new(ChatConfig {
            enabled: true,
            webhook_url: None,
            channel: Some("#alerts".to_string()),
            username: None,
        })
        .unwrap();

        let payload = sink.payload(&sample_alert());
        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "CRITICAL");
        assert_eq!(payload["channel"], "#alerts");

        let info = Alert::new(AlertLevel::Info, "t", "d", "s");
        assert_eq!(sink.payload(&info)["attachments"][0]["color"], "good");
    }

    #[test]
    fn test_email_rendering() {
        let alert = sample_alert();
        assert_eq!(EmailSink::subject(&alert), "[CRITICAL] Application crash detected");
        let body = EmailSink::body(&alert).unwrap();
        assert!(body.contains("- Source: crash_rule"));
        assert!(body.contains("\"crash_count\": 1"));

        let sink = EmailSink::new(EmailConfig {
            from_email: "not an address".to_string(),
            ..EmailConfig::default()
        })
        .unwrap();
        assert!(matches!(
            sink.send(&alert),
            Err(AlertError::NotificationFailed(_))
        ));
    }

    #[test]
    fn test_channels_config() {
        let config = ChannelsConfig::default();
        assert!(config.is_empty());
        assert!(build_sinks(&config).unwrap().is_empty());

        let config = ChannelsConfig {
            console: Some(ConsoleConfig::default()),
            webhook: Some(WebhookConfig {
                enabled: false,
                url: None,
                headers: BTreeMap::new(),
            }),
            ..ChannelsConfig::default()
        };
        assert!(!config.is_empty());
        assert_eq!(config.enabled_channels(), vec![NotificationChannel::Console]);

        let sinks = build_sinks(&config).unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].channel(), NotificationChannel::Console);
    }

    #[test]
    fn test_channel_names() {
        let channel: NotificationChannel = serde_json::from_str("\"slack\"").unwrap();
        assert_eq!(channel, NotificationChannel::Chat);
        assert_eq!(NotificationChannel::Webhook.to_string(), "webhook");
    }
}
