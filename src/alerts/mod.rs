/// Alert policy, escalation and notification delivery
pub mod alert_manager;
pub mod escalation;
pub mod notifiers;
pub mod rate_limiter;

pub use alert_manager::{
    Admission, AlertManager, AlertManagerConfig, AlertOutcome, AlertStatistics,
};
pub use escalation::{default_escalation_rules, DueDispatch, EscalationRule, EscalationScheduler};
pub use notifiers::{
    ChannelsConfig, ChatConfig, ConsoleConfig, Delivery, EmailConfig, FileConfig,
    NotificationChannel, NotificationSink, SinkSet, WebhookConfig,
};
pub use rate_limiter::RateLimiter;
