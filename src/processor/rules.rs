//! Built-in window rules
//!
//! Each rule looks at one closed window and decides independently whether it
//! warrants an alert. A window may raise zero, one or several alerts.

use crate::events::{Alert, AlertLevel};
use crate::processor::window::WindowMetrics;
use crate::processor::ProcessorConfig;

/// Rule evaluated against every closed window
pub trait WindowRule: Send {
    /// Evaluate the rule against a closed window
    ///
    /// # Returns
    ///
    /// An alert stamped with the window end, or `None` if the rule did not fire
    fn evaluate(&self, metrics: &WindowMetrics) -> Option<Alert>;

    /// Stable rule name, used as the alert source
    fn name(&self) -> &str;
}

/// Fires on any crash signature in the window
pub struct CrashRule {
    pub threshold: u64,
}

impl WindowRule for CrashRule {
    fn evaluate(&self, metrics: &WindowMetrics) -> Option<Alert> {
        if metrics.crash_count < self.threshold.max(1) {
            return None;
        }

        let alert = Alert::new(
            AlertLevel::Critical,
            "Application crash detected",
            format!(
                "{} crash(es) detected between {} and {}",
                metrics.crash_count,
                metrics.start.format("%H:%M:%S"),
                metrics.end.format("%H:%M:%S")
            ),
            self.name(),
        )
        .at(metrics.end)
        .with_metadata("crash_count", metrics.crash_count)
        .with_metadata("samples", metrics.crash_samples.clone());
        Some(alert)
    }

    fn name(&self) -> &str {
        "crash_rule"
    }
}

/// Fires on any application-not-responding signature in the window
pub struct AnrRule {
    pub threshold: u64,
}

impl WindowRule for AnrRule {
    fn evaluate(&self, metrics: &WindowMetrics) -> Option<Alert> {
        if metrics.anr_count < self.threshold.max(1) {
            return None;
        }

        Some(
            Alert::new(
                AlertLevel::Error,
                "Application not responding",
                format!("{} ANR event(s) detected", metrics.anr_count),
                self.name(),
            )
            .at(metrics.end)
            .with_metadata("anr_count", metrics.anr_count)
            .with_metadata("samples", metrics.anr_samples.clone()),
        )
    }

    fn name(&self) -> &str {
        "anr_rule"
    }
}

/// Fires on out-of-memory and low-memory-killer signatures
pub struct MemoryRule {
    pub threshold: u64,
}

impl WindowRule for MemoryRule {
    fn evaluate(&self, metrics: &WindowMetrics) -> Option<Alert> {
        if metrics.memory_count < self.threshold.max(1) {
            return None;
        }

        Some(
            Alert::new(
                AlertLevel::Error,
                "Memory pressure detected",
                format!("{} memory issue(s) detected", metrics.memory_count),
                self.name(),
            )
            .at(metrics.end)
            .with_metadata("memory_count", metrics.memory_count)
            .with_metadata("samples", metrics.memory_samples.clone()),
        )
    }

    fn name(&self) -> &str {
        "memory_rule"
    }
}

/// Fires when the share of error records exceeds a fraction of the window
///
/// Escalates from Warning to Error once the rate reaches twice the threshold.
/// Windows with fewer than `min_error_count` errors never fire.
pub struct ErrorRateRule {
    pub threshold: f64,
    pub min_error_count: u64,
}

impl WindowRule for ErrorRateRule {
    fn evaluate(&self, metrics: &WindowMetrics) -> Option<Alert> {
        let errors = metrics.error_count();
        let rate = metrics.error_rate();
        if errors < self.min_error_count || rate <= self.threshold {
            return None;
        }

        let level = if rate >= self.threshold * 2.0 {
            AlertLevel::Error
        } else {
            AlertLevel::Warning
        };

        Some(
            Alert::new(
                level,
                "High error rate",
                format!(
                    "{:.1}% of {} records were errors (threshold {:.1}%)",
                    rate * 100.0,
                    metrics.total_records,
                    self.threshold * 100.0
                ),
                self.name(),
            )
            .at(metrics.end)
            .with_metadata("error_rate", rate)
            .with_metadata("error_count", errors)
            .with_metadata("total_records", metrics.total_records),
        )
    }

    fn name(&self) -> &str {
        "error_rate_rule"
    }
}

/// Fires when a window holds more records than the ceiling
pub struct VolumeSpikeRule {
    pub ceiling: u64,
}

impl WindowRule for VolumeSpikeRule {
    fn evaluate(&self, metrics: &WindowMetrics) -> Option<Alert> {
        if metrics.total_records <= self.ceiling {
            return None;
        }

        Some(
            Alert::new(
                AlertLevel::Warning,
                "Log volume spike",
                format!(
                    "{} records in one window (ceiling {})",
                    metrics.total_records, self.ceiling
                ),
                self.name(),
            )
            .at(metrics.end)
            .with_metadata("total_records", metrics.total_records)
            .with_metadata("distinct_tags", metrics.distinct_tags),
        )
    }

    fn name(&self) -> &str {
        "volume_spike_rule"
    }
}

/// The built-in rule set configured from processor thresholds
pub fn default_rules(config: &ProcessorConfig) -> Vec<Box<dyn WindowRule>> {
    vec![
        Box::new(CrashRule {
            threshold: config.crash_threshold,
        }),
        Box::new(AnrRule {
            threshold: config.anr_threshold,
        }),
        Box::new(MemoryRule {
            threshold: config.memory_threshold,
        }),
        Box::new(ErrorRateRule {
            threshold: config.error_rate_threshold,
            min_error_count: config.min_error_count,
        }),
        Box::new(VolumeSpikeRule {
            ceiling: config.volume_spike_threshold,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use chrono::{Duration, Utc};

    fn metrics() -> WindowMetrics {
        let start = Utc::now();
        WindowMetrics {
            start,
            end: start + Duration::seconds(60),
            total_records: 0,
            level_counts: [0; 6],
            total_message_length: 0,
            error_keyword_count: 0,
            warning_keyword_count: 0,
            distinct_tags: 0,
            crash_count: 0,
            anr_count: 0,
            memory_count: 0,
            crash_samples: Vec::new(),
            anr_samples: Vec::new(),
            memory_samples: Vec::new(),
        }
    }

    #[test]
    fn test_crash_rule_is_zero_tolerance() {
        let rule = CrashRule { threshold: 1 };
        let mut window = metrics();
        assert!(rule.evaluate(&window).is_none());

        window.crash_count = 1;
        window.crash_samples = vec!["AndroidRuntime: FATAL EXCEPTION: main".to_string()];
        let alert = rule.evaluate(&window).unwrap();
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.source, "crash_rule");
        assert_eq!(alert.timestamp, window.end);
        assert_eq!(alert.metadata["crash_count"], serde_json::json!(1));
    }

    #[test]
    fn test_anr_and_memory_rules_raise_errors() {
        let mut window = metrics();
        window.anr_count = 1;
        window.memory_count = 2;

        let anr = AnrRule { threshold: 1 }.evaluate(&window).unwrap();
        assert_eq!(anr.level, AlertLevel::Error);
        let memory = MemoryRule { threshold: 1 }.evaluate(&window).unwrap();
        assert_eq!(memory.level, AlertLevel::Error);
        assert!(MemoryRule { threshold: 3 }.evaluate(&window).is_none());
    }

    #[test]
    fn test_error_rate_levels() {
        let rule = ErrorRateRule {
            threshold: 0.1,
            min_error_count: 5,
        };
        let mut window = metrics();

        // 5 of 40 records = 12.5%
        window.total_records = 40;
        window.level_counts[LogLevel::Error.index()] = 5;
        assert_eq!(rule.evaluate(&window).unwrap().level, AlertLevel::Warning);

        // 5 of 20 records = 25%
        window.total_records = 20;
        assert_eq!(rule.evaluate(&window).unwrap().level, AlertLevel::Error);

        // 4 of 5 records is a high rate but too few errors
        window.total_records = 5;
        window.level_counts[LogLevel::Error.index()] = 4;
        assert!(rule.evaluate(&window).is_none());

        // 5 of 100 records is below the threshold
        window.total_records = 100;
        window.level_counts[LogLevel::Error.index()] = 5;
        assert!(rule.evaluate(&window).is_none());
    }

    #[test]
    fn test_volume_spike_rule() {
        let rule = VolumeSpikeRule { ceiling: 1000 };
        let mut window = metrics();
        window.total_records = 1000;
        assert!(rule.evaluate(&window).is_none());
        window.total_records = 1001;
        assert_eq!(rule.evaluate(&window).unwrap().level, AlertLevel::Warning);
    }

    #[test]
    fn test_default_rules_are_independent() {
        let rules = default_rules(&ProcessorConfig::default());
        let mut window = metrics();
        window.total_records = 3;
        window.crash_count = 1;
        window.anr_count = 1;
        window.memory_count = 1;
        window.level_counts[LogLevel::Error.index()] = 2;

        let alerts: Vec<Alert> = rules.iter().filter_map(|r| r.evaluate(&window)).collect();
        assert_eq!(alerts.len(), 3);
        let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec!["crash_rule", "anr_rule", "memory_rule", "error_rate_rule", "volume_spike_rule"]
        );
    }
}
