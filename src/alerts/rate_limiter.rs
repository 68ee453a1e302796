use crate::events::Timestamp;
use chrono::Duration;
use std::collections::VecDeque;

/// Sliding-window limiter for admitted alerts
///
/// Tracks the timestamps of alerts admitted within the window and refuses new
/// ones once `max_per_window` is reached. Time is taken from the alerts
/// themselves, so the window slides with the alert stream.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    admitted: VecDeque<Timestamp>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_hour(50)
    }
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_window` alerts within `window`
    ///
    /// # Arguments
    ///
    /// * `max_per_window` - Maximum number of alerts admitted per window
    /// * `window` - Length of the sliding window
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            admitted: VecDeque::new(),
        }
    }

    pub fn per_hour(max_per_hour: usize) -> Self {
        Self::new(max_per_hour, Duration::hours(1))
    }

    /// Check whether an alert stamped `at` fits under the limit
    ///
    /// # Returns
    ///
    /// `true` if the alert can be admitted, `false` if rate limited
    pub fn can_send_at(&mut self, at: Timestamp) -> bool {
        self.cleanup(at);
        self.admitted.len() < self.max_per_window
    }

    /// Record that an alert stamped `at` was admitted
    pub fn record_at(&mut self, at: Timestamp) {
        self.admitted.push_back(at);
        self.cleanup(at);
    }

    /// Number of admitted alerts within the window ending at `at`
    pub fn current_count(&mut self, at: Timestamp) -> usize {
        self.cleanup(at);
        self.admitted.len()
    }

    pub fn max_per_window(&self) -> usize {
        self.max_per_window
    }

    fn cleanup(&mut self, now: Timestamp) {
        let cutoff = now - self.window;
        // Alerts may arrive out of order, so scan the whole queue
        self.admitted.retain(|&time| time > cutoff);
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::Utc;
    use quickcheck_macros::quickcheck;

    // Admitting as many alerts as allowed within one window never exceeds the limit
    #[quickcheck]
    fn prop_never_exceeds_limit(max: u8, offsets: Vec<u16>) -> bool {
        let max = usize::from(max % 20);
        let mut limiter = RateLimiter::per_hour(max);
        let base = Utc::now();

        let mut offsets = offsets;
        offsets.sort_unstable();

        offsets.into_iter().all(|offset| {
            let at = base + Duration::seconds(i64::from(offset % 3600));
            if limiter.can_send_at(at) {
                limiter.record_at(at);
            }
            limiter.current_count(at) <= max
        })
    }
}
