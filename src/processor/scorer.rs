use crate::events::{Alert, AlertLevel};
use crate::processor::window::WindowMetrics;
use std::collections::VecDeque;

/// Optional capability that inspects closed windows for anomalies
///
/// The processor always runs its built-in rules; a scorer can only add
/// alerts on top of them.
pub trait AnomalyScorer: Send {
    fn name(&self) -> &str;

    /// Score a closed window, returning any alerts it warrants
    fn score(&mut self, metrics: &WindowMetrics) -> Vec<Alert>;
}

/// Scorer used when no anomaly detection is configured
#[derive(Debug, Default)]
pub struct NoopScorer;

impl AnomalyScorer for NoopScorer {
    fn name(&self) -> &str {
        "none"
    }

    fn score(&mut self, _metrics: &WindowMetrics) -> Vec<Alert> {
        Vec::new()
    }
}

/// Flags windows whose volume sits far above the recent baseline
///
/// Keeps the record counts of the last `history_size` windows and raises a
/// Warning when a window exceeds the mean by more than `sigma` standard
/// deviations.
#[derive(Debug)]
pub struct BaselineScorer {
    history: VecDeque<u64>,
    history_size: usize,
    min_history: usize,
    min_records: u64,
    sigma: f64,
}

impl BaselineScorer {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            history_size: 20,
            min_history: 5,
            min_records: 10,
            sigma: 3.0,
        }
    }

    fn baseline(&self) -> (f64, f64) {
        let n = self.history.len() as f64;
        let mean = self.history.iter().sum::<u64>() as f64 / n;
        let variance = self
            .history
            .iter()
            .map(|count| {
                let diff = *count as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    }
}

impl Default for BaselineScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyScorer for BaselineScorer {
    fn name(&self) -> &str {
        "baseline"
    }

    fn score(&mut self, metrics: &WindowMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if self.history.len() >= self.min_history && metrics.total_records >= self.min_records {
            let (mean, deviation) = self.baseline();
            let limit = mean + self.sigma * deviation;
            if metrics.total_records as f64 > limit {
                alerts.push(
                    Alert::new(
                        AlertLevel::Warning,
                        "Anomalous log volume",
                        format!(
                            "{} records against a baseline of {:.1} (+/- {:.1})",
                            metrics.total_records, mean, deviation
                        ),
                        "baseline_scorer",
                    )
                    .at(metrics.end)
                    .with_metadata("total_records", metrics.total_records)
                    .with_metadata("baseline_mean", mean)
                    .with_metadata("baseline_deviation", deviation),
                );
            }
        }

        self.history.push_back(metrics.total_records);
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
        alerts
    }
}
