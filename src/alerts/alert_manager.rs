use crate::alerts::escalation::{
    default_escalation_rules, validate_rules, DueDispatch, EscalationRule, EscalationScheduler,
};
use crate::alerts::notifiers::{
    ChannelsConfig, Delivery, NotificationChannel, NotificationSink, SinkSet,
};
use crate::alerts::RateLimiter;
use crate::error::ConfigError;
use crate::events::{Alert, AlertLevel, Timestamp};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Hard cap on retained history entries
const MAX_HISTORY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertManagerConfig {
    pub max_alerts_per_hour: usize,
    pub enable_deduplication: bool,
    pub deduplication_window_seconds: u64,
    pub escalation: Vec<EscalationRule>,
    pub channels: ChannelsConfig,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            max_alerts_per_hour: 50,
            enable_deduplication: true,
            deduplication_window_seconds: 3600,
            escalation: default_escalation_rules(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AlertManagerConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::seconds(self.deduplication_window_seconds.min(i32::MAX as u64) as i64)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an invalid escalation rule set
    /// or an out-of-range deduplication window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deduplication_window_seconds > i32::MAX as u64 {
            return Err(ConfigError::ValidationError(format!(
                "deduplication_window_seconds must not exceed {}",
                i32::MAX
            )));
        }
        validate_rules(&self.escalation)
    }
}

/// What happened to an alert handed to the manager
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// Sent to the rule's channels right away
    Dispatched { delivered: usize, failed: usize },
    /// Queued until its escalation delay has passed
    Scheduled { due: Timestamp },
    Duplicate,
    RateLimited,
    NoEscalationRule,
}

/// Policy decision for an alert, before any channel is contacted
#[derive(Debug, Clone)]
pub enum Admission {
    /// Deliver now to the listed channels
    Dispatch(DueDispatch),
    Scheduled { due: Timestamp },
    Duplicate,
    RateLimited,
    NoEscalationRule,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertStatistics {
    pub total_alerts: usize,
    pub alerts_by_level: BTreeMap<AlertLevel, usize>,
    /// Alerts within the trailing hour
    pub recent_alerts_count: usize,
    pub last_alert_time: Option<Timestamp>,
    pub suppressed_duplicates: u64,
    pub suppressed_rate_limited: u64,
    pub suppressed_no_rule: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub pending_escalations: usize,
}

/// Gates alerts through deduplication, rate limiting and escalation, then
/// routes them to the notification sinks
///
/// Every alert is recorded in history before any policy check. Sink failures
/// are logged per channel and never stop delivery to the other channels.
///
/// [`AlertManager::admit`] and [`AlertManager::due`] only make the policy
/// decision, so a caller can deliver with its own [`SinkSet`] without holding
/// the manager.
pub struct AlertManager {
    config: AlertManagerConfig,
    rules: HashMap<AlertLevel, EscalationRule>,
    sinks: SinkSet,
    history: VecDeque<Alert>,
    newest: Option<Timestamp>,
    rate_limiter: RateLimiter,
    scheduler: EscalationScheduler,
    suppressed_duplicates: u64,
    suppressed_rate_limited: u64,
    suppressed_no_rule: u64,
    notifications_sent: u64,
    notifications_failed: u64,
}

impl AlertManager {
    /// Create a manager with sinks for every enabled channel in the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or a channel
    /// cannot be set up.
    pub fn new(config: AlertManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let sinks = SinkSet::from_config(&config.channels).map_err(|e| {
            ConfigError::ValidationError(format!("failed to set up notification channels: {}", e))
        })?;

        let rules = config
            .escalation
            .iter()
            .map(|rule| (rule.level, rule.clone()))
            .collect();

        info!(
            "Alert manager ready: {} escalation rule(s), channels {:?}",
            config.escalation.len(),
            sinks.channels()
        );

        Ok(Self {
            rate_limiter: RateLimiter::per_hour(config.max_alerts_per_hour),
            config,
            rules,
            sinks,
            history: VecDeque::new(),
            newest: None,
            scheduler: EscalationScheduler::new(),
            suppressed_duplicates: 0,
            suppressed_rate_limited: 0,
            suppressed_no_rule: 0,
            notifications_sent: 0,
            notifications_failed: 0,
        })
    }

    /// Add a sink, replacing any existing sink for the same channel
    pub fn register_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.register(sink);
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.sinks.channels()
    }

    /// Move the sinks out, leaving the manager with none
    pub fn take_sinks(&mut self) -> SinkSet {
        std::mem::take(&mut self.sinks)
    }

    /// Run an alert through the policy chain and dispatch it
    ///
    /// # Returns
    ///
    /// The outcome of the policy checks and, for immediate dispatch, the
    /// number of channels delivered and failed.
    pub fn process_alert(&mut self, alert: Alert) -> AlertOutcome {
        match self.admit(alert) {
            Admission::Dispatch(dispatch) => {
                let delivery = self.sinks.deliver(&dispatch.alert, &dispatch.channels);
                self.record_delivery(delivery);
                AlertOutcome::Dispatched {
                    delivered: delivery.delivered,
                    failed: delivery.failed,
                }
            }
            Admission::Scheduled { due } => AlertOutcome::Scheduled { due },
            Admission::Duplicate => AlertOutcome::Duplicate,
            Admission::RateLimited => AlertOutcome::RateLimited,
            Admission::NoEscalationRule => AlertOutcome::NoEscalationRule,
        }
    }

    /// Apply deduplication, rate limiting and escalation lookup to an alert
    ///
    /// Nothing is sent. An immediate dispatch is returned to the caller, who
    /// reports the result through [`AlertManager::record_delivery`].
    pub fn admit(&mut self, alert: Alert) -> Admission {
        self.record_history(&alert);

        if self.config.enable_deduplication && self.is_duplicate(&alert) {
            self.suppressed_duplicates += 1;
            self.scheduler.record_duplicate(&alert);
            debug!(
                "Suppressed duplicate alert '{}' from {}",
                alert.title, alert.source
            );
            return Admission::Duplicate;
        }

        if !self.rate_limiter.can_send_at(alert.timestamp) {
            self.suppressed_rate_limited += 1;
            warn!(
                "Rate limit of {} alerts per hour reached, suppressing '{}'",
                self.rate_limiter.max_per_window(),
                alert.title
            );
            return Admission::RateLimited;
        }

        let Some(rule) = self.rules.get(&alert.level).cloned() else {
            self.suppressed_no_rule += 1;
            warn!(
                "No escalation rule for level '{}', suppressing '{}'",
                alert.level, alert.title
            );
            return Admission::NoEscalationRule;
        };

        self.rate_limiter.record_at(alert.timestamp);

        if rule.is_immediate() {
            self.scheduler.record_dispatch(&alert, &rule, alert.timestamp);
            Admission::Dispatch(DueDispatch {
                alert,
                channels: rule.channels,
                repeat: false,
            })
        } else {
            let due = alert.timestamp + rule.delay();
            self.scheduler.schedule(alert, &rule);
            Admission::Scheduled { due }
        }
    }

    /// Dispatch deferred alerts and repeat notifications that are due at `now`
    ///
    /// # Returns
    ///
    /// The number of alerts dispatched
    pub fn tick(&mut self, now: Timestamp) -> usize {
        let due = self.due(now);
        for dispatch in &due {
            let delivery = self.sinks.deliver(&dispatch.alert, &dispatch.channels);
            self.record_delivery(delivery);
        }
        due.len()
    }

    /// Take the deferred alerts and repeat notifications that are due at `now`
    pub fn due(&mut self, now: Timestamp) -> Vec<DueDispatch> {
        let due = self.scheduler.due(now, self.config.dedup_window());
        for dispatch in due.iter().filter(|dispatch| dispatch.repeat) {
            info!("Re-notifying '{}' ({})", dispatch.alert.title, dispatch.alert.source);
        }
        due
    }

    pub fn record_delivery(&mut self, delivery: Delivery) {
        self.notifications_sent += delivery.delivered as u64;
        self.notifications_failed += delivery.failed as u64;
    }

    /// Deferred dispatches still waiting for their delay
    pub fn pending_escalations(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Drop deferred dispatches that have not come due
    ///
    /// # Returns
    ///
    /// The number of dispatches dropped
    pub fn discard_pending(&mut self) -> usize {
        self.scheduler.clear_pending()
    }

    pub fn get_alert_statistics(&self) -> AlertStatistics {
        self.get_alert_statistics_at(Utc::now())
    }

    /// Statistics with the trailing hour measured back from `now`
    pub fn get_alert_statistics_at(&self, now: Timestamp) -> AlertStatistics {
        let mut alerts_by_level: BTreeMap<AlertLevel, usize> =
            AlertLevel::ALL.iter().map(|level| (*level, 0)).collect();
        for alert in &self.history {
            *alerts_by_level.entry(alert.level).or_insert(0) += 1;
        }

        let hour_ago = now - Duration::hours(1);
        AlertStatistics {
            total_alerts: self.history.len(),
            alerts_by_level,
            recent_alerts_count: self
                .history
                .iter()
                .filter(|alert| alert.timestamp > hour_ago)
                .count(),
            last_alert_time: self.history.iter().map(|alert| alert.timestamp).max(),
            suppressed_duplicates: self.suppressed_duplicates,
            suppressed_rate_limited: self.suppressed_rate_limited,
            suppressed_no_rule: self.suppressed_no_rule,
            notifications_sent: self.notifications_sent,
            notifications_failed: self.notifications_failed,
            pending_escalations: self.scheduler.pending_count(),
        }
    }

    /// The newest `limit` alerts, oldest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    fn record_history(&mut self, alert: &Alert) {
        let newest = match self.newest {
            Some(newest) if newest >= alert.timestamp => newest,
            _ => alert.timestamp,
        };
        self.newest = Some(newest);

        let retention = self.config.dedup_window().max(Duration::hours(1));
        let cutoff = newest - retention;
        self.history.retain(|entry| entry.timestamp >= cutoff);

        self.history.push_back(alert.clone());
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    fn is_duplicate(&self, alert: &Alert) -> bool {
        let window = self.config.dedup_window();
        self.history.iter().any(|other| {
            if other.id == alert.id || other.title != alert.title || other.source != alert.source {
                return false;
            }
            let gap = if other.timestamp > alert.timestamp {
                other.timestamp - alert.timestamp
            } else {
                alert.timestamp - other.timestamp
            };
            gap <= window
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifiers::MockNotificationSink;
    use crate::error::AlertError;

    fn immediate_rules(channels: Vec<NotificationChannel>) -> Vec<EscalationRule> {
        AlertLevel::ALL
            .iter()
            .map(|level| EscalationRule {
                level: *level,
                delay_minutes: 0,
                channels: channels.clone(),
                repeat_interval_minutes: None,
            })
            .collect()
    }

    fn manager_with(config: AlertManagerConfig) -> AlertManager {
        AlertManager::new(config).unwrap()
    }

    fn immediate_manager(max_per_hour: usize) -> AlertManager {
        manager_with(AlertManagerConfig {
            max_alerts_per_hour: max_per_hour,
            escalation: immediate_rules(vec![NotificationChannel::Console]),
            ..AlertManagerConfig::default()
        })
    }

    fn counting_sink(channel: NotificationChannel, times: usize) -> Box<MockNotificationSink> {
        let mut sink = MockNotificationSink::new();
        sink.expect_channel().return_const(channel);
        sink.expect_send().times(times).returning(|_| Ok(()));
        Box::new(sink)
    }

    fn crash_alert() -> Alert {
        Alert::new(AlertLevel::Critical, "Application crash detected", "d", "crash_rule")
    }

    #[test]
    fn test_duplicates_within_window_are_suppressed() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 1));

        let now = Utc::now();
        let first = manager.process_alert(crash_alert().at(now));
        let second = manager.process_alert(crash_alert().at(now + Duration::minutes(10)));

        assert_eq!(first, AlertOutcome::Dispatched { delivered: 1, failed: 0 });
        assert_eq!(second, AlertOutcome::Duplicate);

        let stats = manager.get_alert_statistics_at(now);
        assert_eq!(stats.total_alerts, 2);
        assert_eq!(stats.suppressed_duplicates, 1);
        assert_eq!(stats.notifications_sent, 1);
    }

    #[test]
    fn test_duplicates_outside_window_are_dispatched() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 2));

        let now = Utc::now();
        manager.process_alert(crash_alert().at(now));
        let later = manager.process_alert(crash_alert().at(now + Duration::seconds(3601)));
        assert_eq!(later, AlertOutcome::Dispatched { delivered: 1, failed: 0 });
    }

    #[test]
    fn test_different_source_is_not_duplicate() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 2));

        manager.process_alert(crash_alert());
        let mut other = crash_alert();
        other.source = "baseline_scorer".to_string();
        assert!(matches!(manager.process_alert(other), AlertOutcome::Dispatched { .. }));
    }

    #[test]
    fn test_deduplication_can_be_disabled() {
        let mut manager = manager_with(AlertManagerConfig {
            enable_deduplication: false,
            escalation: immediate_rules(vec![NotificationChannel::Console]),
            ..AlertManagerConfig::default()
        });
        manager.register_sink(counting_sink(NotificationChannel::Console, 2));

        manager.process_alert(crash_alert());
        manager.process_alert(crash_alert());
    }

    #[test]
    fn test_rate_limit_caps_dispatches() {
        let max = 5;
        let mut manager = immediate_manager(max);
        manager.register_sink(counting_sink(NotificationChannel::Console, max));

        let now = Utc::now();
        let outcomes: Vec<AlertOutcome> = (0..=max)
            .map(|i| {
                manager.process_alert(
                    Alert::new(AlertLevel::Error, format!("Alert {}", i), "d", "test")
                        .at(now + Duration::seconds(i as i64)),
                )
            })
            .collect();

        assert_eq!(outcomes[max], AlertOutcome::RateLimited);
        assert_eq!(manager.get_alert_statistics_at(now).suppressed_rate_limited, 1);
    }

    #[test]
    fn test_missing_escalation_rule() {
        let mut manager = manager_with(AlertManagerConfig {
            escalation: vec![EscalationRule {
                level: AlertLevel::Critical,
                delay_minutes: 0,
                channels: vec![NotificationChannel::Console],
                repeat_interval_minutes: None,
            }],
            ..AlertManagerConfig::default()
        });
        manager.register_sink(counting_sink(NotificationChannel::Console, 0));

        let outcome = manager.process_alert(Alert::new(AlertLevel::Info, "Note", "d", "test"));
        assert_eq!(outcome, AlertOutcome::NoEscalationRule);
        assert_eq!(manager.get_alert_statistics().suppressed_no_rule, 1);
    }

    #[test]
    fn test_channel_failure_is_isolated() {
        let mut manager = manager_with(AlertManagerConfig {
            escalation: immediate_rules(vec![
                NotificationChannel::Webhook,
                NotificationChannel::File,
                NotificationChannel::Email,
            ]),
            ..AlertManagerConfig::default()
        });

        let mut failing = MockNotificationSink::new();
        failing.expect_channel().return_const(NotificationChannel::Webhook);
        failing
            .expect_send()
            .times(1)
            .returning(|_| Err(AlertError::NotificationFailed("connection refused".to_string())));
        manager.register_sink(Box::new(failing));
        manager.register_sink(counting_sink(NotificationChannel::File, 1));

        // Email has no sink and is skipped
        let outcome = manager.process_alert(crash_alert());
        assert_eq!(outcome, AlertOutcome::Dispatched { delivered: 1, failed: 1 });

        let stats = manager.get_alert_statistics();
        assert_eq!(stats.notifications_sent, 1);
        assert_eq!(stats.notifications_failed, 1);
    }

    #[test]
    fn test_register_sink_replaces_channel() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 0));
        manager.register_sink(counting_sink(NotificationChannel::Console, 1));
        assert_eq!(manager.channels(), vec![NotificationChannel::Console]);

        manager.process_alert(crash_alert());
    }

    #[test]
    fn test_admit_leaves_delivery_to_the_caller() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 0));

        let Admission::Dispatch(dispatch) = manager.admit(crash_alert()) else {
            panic!("expected an immediate dispatch");
        };
        assert_eq!(dispatch.channels, vec![NotificationChannel::Console]);
        assert!(!dispatch.repeat);
        assert!(matches!(manager.admit(crash_alert()), Admission::Duplicate));

        let mut sinks = manager.take_sinks();
        assert!(manager.channels().is_empty());
        sinks.register(counting_sink(NotificationChannel::Console, 1));
        let delivery = sinks.deliver(&dispatch.alert, &dispatch.channels);
        manager.record_delivery(delivery);

        let stats = manager.get_alert_statistics();
        assert_eq!(stats.total_alerts, 2);
        assert_eq!(stats.notifications_sent, 1);
    }

    #[test]
    fn test_deferred_dispatch_through_tick() {
        let mut manager = manager_with(AlertManagerConfig::default());
        manager.register_sink(counting_sink(NotificationChannel::Console, 1));

        let now = Utc::now();
        let alert = Alert::new(AlertLevel::Warning, "High error rate", "d", "error_rate_rule").at(now);
        let outcome = manager.process_alert(alert);
        assert_eq!(outcome, AlertOutcome::Scheduled { due: now + Duration::minutes(5) });
        assert_eq!(manager.get_alert_statistics_at(now).pending_escalations, 1);
        assert_eq!(manager.pending_escalations(), 1);

        assert_eq!(manager.tick(now + Duration::minutes(4)), 0);
        assert_eq!(manager.tick(now + Duration::minutes(5)), 1);
        assert_eq!(manager.pending_escalations(), 0);

        manager.process_alert(
            Alert::new(AlertLevel::Info, "Note", "d", "test").at(now + Duration::minutes(6)),
        );
        assert_eq!(manager.discard_pending(), 1);
        assert_eq!(manager.tick(now + Duration::hours(1)), 0);
        assert_eq!(manager.get_alert_statistics_at(now).pending_escalations, 0);
    }

    #[test]
    fn test_repeat_notification_after_interval() {
        let mut manager = manager_with(AlertManagerConfig::default());
        // Critical goes to console and email immediately, then once more on repeat
        manager.register_sink(counting_sink(NotificationChannel::Console, 2));
        manager.register_sink(counting_sink(NotificationChannel::Email, 2));

        let now = Utc::now();
        manager.process_alert(crash_alert().at(now));
        manager.process_alert(crash_alert().at(now + Duration::minutes(5)));

        assert_eq!(manager.tick(now + Duration::minutes(10)), 0);
        assert_eq!(manager.tick(now + Duration::minutes(15)), 1);
        assert_eq!(manager.tick(now + Duration::minutes(31)), 0);
    }

    #[test]
    fn test_statistics_and_recent_alerts() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 3));

        let now = Utc::now();
        manager.process_alert(Alert::new(AlertLevel::Critical, "A", "d", "s").at(now - Duration::minutes(50)));
        manager.process_alert(Alert::new(AlertLevel::Error, "B", "d", "s").at(now - Duration::minutes(10)));
        manager.process_alert(Alert::new(AlertLevel::Error, "C", "d", "s").at(now));

        let stats = manager.get_alert_statistics_at(now + Duration::minutes(30));
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.alerts_by_level[&AlertLevel::Error], 2);
        assert_eq!(stats.alerts_by_level[&AlertLevel::Info], 0);
        assert_eq!(stats.recent_alerts_count, 2);
        assert_eq!(stats.last_alert_time, Some(now));

        let recent = manager.recent_alerts(2);
        let titles: Vec<&str> = recent.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "C"]);
        assert_eq!(manager.recent_alerts(10).len(), 3);
    }

    #[test]
    fn test_history_is_pruned_by_age() {
        let mut manager = immediate_manager(50);
        manager.register_sink(counting_sink(NotificationChannel::Console, 2));

        let now = Utc::now();
        manager.process_alert(Alert::new(AlertLevel::Error, "Old", "d", "s").at(now - Duration::hours(2)));
        manager.process_alert(Alert::new(AlertLevel::Error, "New", "d", "s").at(now));

        assert_eq!(manager.get_alert_statistics_at(now).total_alerts, 1);
    }

    #[test]
    fn test_invalid_escalation_is_rejected() {
        let config = AlertManagerConfig {
            escalation: vec![
                EscalationRule {
                    level: AlertLevel::Error,
                    delay_minutes: 0,
                    channels: vec![NotificationChannel::Console],
                    repeat_interval_minutes: None,
                },
                EscalationRule {
                    level: AlertLevel::Error,
                    delay_minutes: 5,
                    channels: vec![NotificationChannel::File],
                    repeat_interval_minutes: None,
                },
            ],
            ..AlertManagerConfig::default()
        };
        assert!(matches!(
            AlertManager::new(config),
            Err(ConfigError::ValidationError(_))
        ));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::alerts::notifiers::MockNotificationSink;
    use quickcheck_macros::quickcheck;

    // Distinct alerts inside one hour are dispatched exactly min(count, limit) times
    #[quickcheck]
    fn prop_rate_limit_is_exact(limit: u8, count: u8) -> bool {
        let limit = usize::from(limit % 10);
        let count = usize::from(count % 20);

        let mut manager = AlertManager::new(AlertManagerConfig {
            max_alerts_per_hour: limit,
            escalation: vec![EscalationRule {
                level: AlertLevel::Error,
                delay_minutes: 0,
                channels: vec![NotificationChannel::Console],
                repeat_interval_minutes: None,
            }],
            ..AlertManagerConfig::default()
        })
        .unwrap();

        let mut sink = MockNotificationSink::new();
        sink.expect_channel().return_const(NotificationChannel::Console);
        sink.expect_send().returning(|_| Ok(()));
        manager.register_sink(Box::new(sink));

        let now = Utc::now();
        let dispatched = (0..count)
            .filter(|i| {
                matches!(
                    manager.process_alert(
                        Alert::new(AlertLevel::Error, format!("Alert {}", i), "d", "prop")
                            .at(now + Duration::seconds(*i as i64))
                    ),
                    AlertOutcome::Dispatched { .. }
                )
            })
            .count();

        dispatched == count.min(limit)
    }
}
