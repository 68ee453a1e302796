//! Escalation policy and the deferred/repeat dispatch scheduler

use crate::alerts::notifiers::NotificationChannel;
use crate::error::ConfigError;
use crate::events::{Alert, AlertLevel, Timestamp};
use chrono::Duration;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Upper bound for delays and repeat intervals (one year)
const MAX_MINUTES: u64 = 525_600;

/// Maps one alert level to a dispatch delay, channels and repeat interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationRule {
    pub level: AlertLevel,
    #[serde(default)]
    pub delay_minutes: u64,
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub repeat_interval_minutes: Option<u64>,
}

impl EscalationRule {
    pub fn delay(&self) -> Duration {
        minutes(self.delay_minutes)
    }

    pub fn repeat_interval(&self) -> Option<Duration> {
        self.repeat_interval_minutes.map(minutes)
    }

    pub fn is_immediate(&self) -> bool {
        self.delay_minutes == 0
    }
}

fn minutes(value: u64) -> Duration {
    Duration::minutes(value.min(MAX_MINUTES) as i64)
}

pub fn default_escalation_rules() -> Vec<EscalationRule> {
    vec![
        EscalationRule {
            level: AlertLevel::Critical,
            delay_minutes: 0,
            channels: vec![NotificationChannel::Console, NotificationChannel::Email],
            repeat_interval_minutes: Some(15),
        },
        EscalationRule {
            level: AlertLevel::Error,
            delay_minutes: 1,
            channels: vec![NotificationChannel::Console],
            repeat_interval_minutes: Some(30),
        },
        EscalationRule {
            level: AlertLevel::Warning,
            delay_minutes: 5,
            channels: vec![NotificationChannel::Console],
            repeat_interval_minutes: Some(60),
        },
        EscalationRule {
            level: AlertLevel::Info,
            delay_minutes: 10,
            channels: vec![NotificationChannel::File],
            repeat_interval_minutes: None,
        },
    ]
}

/// Check a rule set for duplicate levels, empty channel lists and bad intervals
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` describing the first offending rule.
pub fn validate_rules(rules: &[EscalationRule]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for rule in rules {
        if !seen.insert(rule.level) {
            return Err(ConfigError::ValidationError(format!(
                "more than one escalation rule for level '{}'",
                rule.level
            )));
        }
        if rule.channels.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "escalation rule for level '{}' has no channels",
                rule.level
            )));
        }
        if rule.delay_minutes > MAX_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "escalation delay for level '{}' exceeds {} minutes",
                rule.level, MAX_MINUTES
            )));
        }
        match rule.repeat_interval_minutes {
            Some(0) => {
                return Err(ConfigError::ValidationError(format!(
                    "repeat interval for level '{}' must be greater than zero",
                    rule.level
                )))
            }
            Some(interval) if interval > MAX_MINUTES => {
                return Err(ConfigError::ValidationError(format!(
                    "repeat interval for level '{}' exceeds {} minutes",
                    rule.level, MAX_MINUTES
                )))
            }
            _ => {}
        }
    }

    Ok(())
}

/// A dispatch that has come due
#[derive(Debug, Clone)]
pub struct DueDispatch {
    pub alert: Alert,
    pub channels: Vec<NotificationChannel>,
    /// True for re-notifications of an already dispatched alert
    pub repeat: bool,
}

#[derive(Debug)]
struct PendingDispatch {
    due: Timestamp,
    alert: Alert,
    channels: Vec<NotificationChannel>,
    repeat_interval: Option<Duration>,
}

#[derive(Debug)]
struct RepeatState {
    interval: Duration,
    channels: Vec<NotificationChannel>,
    last_notified: Timestamp,
    last_seen: Timestamp,
    latest: Alert,
    /// Duplicates suppressed since the key was first dispatched
    suppressed_count: u64,
    /// Duplicates suppressed since the last notification
    unannounced: u64,
    repeat_count: u64,
}

/// Holds deferred dispatches and repeat state between ticks
///
/// Deferred dispatches are keyed by alert id. Repeat state is keyed by the
/// alert's (title, source) pair, the same key deduplication uses.
#[derive(Debug, Default)]
pub struct EscalationScheduler {
    pending: BTreeMap<String, PendingDispatch>,
    repeats: HashMap<(String, String), RepeatState>,
}

impl EscalationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an alert until `alert.timestamp + rule.delay()`
    pub fn schedule(&mut self, alert: Alert, rule: &EscalationRule) {
        let due = alert.timestamp + rule.delay();
        debug!("Deferring alert '{}' until {}", alert.title, due);
        self.pending.insert(
            alert.id.clone(),
            PendingDispatch {
                due,
                alert,
                channels: rule.channels.clone(),
                repeat_interval: rule.repeat_interval(),
            },
        );
    }

    /// Remember a dispatched alert so later duplicates can be re-notified
    pub fn record_dispatch(&mut self, alert: &Alert, rule: &EscalationRule, at: Timestamp) {
        if let Some(interval) = rule.repeat_interval() {
            self.track_repeat(alert, rule.channels.clone(), interval, at);
        }
    }

    /// Count a suppressed duplicate against its dispatched original
    pub fn record_duplicate(&mut self, alert: &Alert) {
        if let Some(state) = self.repeats.get_mut(&alert.dedup_key()) {
            state.suppressed_count += 1;
            state.unannounced += 1;
            if alert.timestamp >= state.last_seen {
                state.last_seen = alert.timestamp;
                state.latest = alert.clone();
            }
        }
    }

    /// Collect every dispatch due at `now`
    ///
    /// Deferred alerts come first in due order, followed by repeats. Repeat
    /// keys with no occurrence inside `dedup_window` are forgotten.
    pub fn due(&mut self, now: Timestamp, dedup_window: Duration) -> Vec<DueDispatch> {
        let due_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut deferred: Vec<PendingDispatch> = due_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        deferred.sort_by_key(|pending| pending.due);

        let mut dispatches = Vec::new();
        for pending in deferred {
            if let Some(interval) = pending.repeat_interval {
                self.track_repeat(&pending.alert, pending.channels.clone(), interval, now);
            }
            dispatches.push(DueDispatch {
                alert: pending.alert,
                channels: pending.channels,
                repeat: false,
            });
        }

        for state in self.repeats.values_mut() {
            if state.unannounced == 0 || now < state.last_notified + state.interval {
                continue;
            }
            state.repeat_count += 1;
            state.unannounced = 0;
            state.last_notified = now;

            let alert = state
                .latest
                .clone()
                .with_metadata("repeat_count", state.repeat_count)
                .with_metadata("suppressed_count", state.suppressed_count);
            dispatches.push(DueDispatch {
                alert,
                channels: state.channels.clone(),
                repeat: true,
            });
        }

        self.repeats.retain(|_, state| now - state.last_seen <= dedup_window);
        dispatches
    }

    /// Number of deferred dispatches waiting for their due time
    /// Drop every deferred dispatch, returning how many there were
    pub fn clear_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of dispatched keys eligible for re-notification
    pub fn repeat_count(&self) -> usize {
        self.repeats.len()
    }

    fn track_repeat(
        &mut self,
        alert: &Alert,
        channels: Vec<NotificationChannel>,
        interval: Duration,
        at: Timestamp,
    ) {
        self.repeats.insert(
            alert.dedup_key(),
            RepeatState {
                interval,
                channels,
                last_notified: at,
                last_seen: alert.timestamp,
                latest: alert.clone(),
                suppressed_count: 0,
                unannounced: 0,
                repeat_count: 0,
            },
        );
    }
}
