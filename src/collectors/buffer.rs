use crate::events::LogRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bounded record queue shared between a collector and its consumer
///
/// Writers never block: when the queue is full the oldest record is evicted
/// under the same lock that admits the new one, so readers never observe a
/// queue longer than its capacity.
#[derive(Debug)]
pub struct RecordBuffer {
    queue: Mutex<VecDeque<LogRecord>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl RecordBuffer {
    /// Create a buffer holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a record, evicting the oldest one on overflow
    ///
    /// # Returns
    ///
    /// The evicted record, if the buffer was full.
    pub fn push(&self, record: LogRecord) -> Option<LogRecord> {
        let evicted = {
            let mut queue = self.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(record);
            evicted
        };

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.available.notify_one();
        evicted
    }

    pub fn try_recv(&self) -> Option<LogRecord> {
        self.lock().pop_front()
    }

    /// Dequeue the oldest record, waiting up to `timeout` for one to arrive
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LogRecord> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();

        loop {
            if let Some(record) = queue.pop_front() {
                return Some(record);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            let (guard, _) = self
                .available
                .wait_timeout(queue, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
        }
    }

    /// Remove and return everything currently queued, oldest first
    pub fn drain(&self) -> Vec<LogRecord> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records evicted by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use chrono::Utc;
    use std::sync::Arc;
    use std::thread;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            pid: None,
            tid: None,
            level: LogLevel::Info,
            tag: "Test".to_string(),
            message: message.to_string(),
            raw_line: message.to_string(),
            source_id: "test".to_string(),
        }
    }

    #[test]
    fn test_overflow_keeps_newest_in_order() {
        let buffer = RecordBuffer::new(3);
        for i in 0..3 {
            assert!(buffer.push(record(&i.to_string())).is_none());
        }

        let evicted = buffer.push(record("3")).unwrap();
        assert_eq!(evicted.message, "0");
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 1);

        let messages: Vec<String> = buffer.drain().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["1", "2", "3"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = RecordBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(record("a"));
        buffer.push(record("b"));
        assert_eq!(buffer.try_recv().unwrap().message, "b");
        assert!(buffer.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_on_empty_buffer() {
        let buffer = RecordBuffer::new(4);
        let started = Instant::now();
        assert!(buffer.recv_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_recv_timeout_wakes_on_push() {
        let buffer = Arc::new(RecordBuffer::new(4));
        let writer = Arc::clone(&buffer);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.push(record("late"));
        });

        let received = buffer.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received.message, "late");
        handle.join().unwrap();
    }
}
