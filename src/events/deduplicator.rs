//! Suppression of repeated context announcements.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::types::Context;

/// Decides whether the processor needs to announce a context with an index event.
pub trait ContextDeduplicator: Send + Sync {
    /// Returns true the first time a context's canonical key is seen since the last flush.
    fn process_context(&self, context: &Context) -> bool;

    /// Forgets every context seen so far.
    fn flush(&self);

    /// How often the processor should call [`flush`](Self::flush). `None` disables the timer.
    fn flush_interval(&self) -> Option<Duration>;
}

struct SeenKeys {
    keys: HashSet<String>,
    order: VecDeque<String>,
    last_flush: Instant,
}

/// Capacity-bounded set of canonical context keys that evicts the oldest key on overflow.
pub struct DefaultContextDeduplicator {
    capacity: usize,
    flush_interval: Duration,
    seen: Mutex<SeenKeys>,
}

impl DefaultContextDeduplicator {
    pub fn new(capacity: usize, flush_interval: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            flush_interval,
            seen: Mutex::new(SeenKeys {
                keys: HashSet::new(),
                order: VecDeque::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.seen.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the cache was created or last flushed.
    pub fn last_flush(&self) -> Instant {
        self.seen.lock().last_flush
    }
}

impl ContextDeduplicator for DefaultContextDeduplicator {
    fn process_context(&self, context: &Context) -> bool {
        let key = context.fully_qualified_key();
        let mut seen = self.seen.lock();

        if seen.keys.contains(&key) {
            return false;
        }

        while seen.order.len() >= self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.keys.remove(&oldest);
            }
        }

        seen.keys.insert(key.clone());
        seen.order.push_back(key);
        true
    }

    fn flush(&self) {
        let mut seen = self.seen.lock();
        seen.keys.clear();
        seen.order.clear();
        seen.last_flush = Instant::now();
        tracing::debug!("Context key cache flushed");
    }

    fn flush_interval(&self) -> Option<Duration> {
        Some(self.flush_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sight_only() {
        let dedup = DefaultContextDeduplicator::new(10, Duration::from_secs(300));
        let context = Context::new("user-1");

        assert!(dedup.process_context(&context));
        assert!(!dedup.process_context(&context));
        assert!(!dedup.process_context(&Context::new("user-1")));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_kind_distinguishes_keys() {
        let dedup = DefaultContextDeduplicator::new(10, Duration::from_secs(300));
        assert!(dedup.process_context(&Context::new("a")));
        assert!(dedup.process_context(&Context::builder_with_kind("org", "a").build()));
    }

    #[test]
    fn test_evicts_oldest() {
        let dedup = DefaultContextDeduplicator::new(2, Duration::from_secs(300));
        assert!(dedup.process_context(&Context::new("a")));
        assert!(dedup.process_context(&Context::new("b")));
        assert!(dedup.process_context(&Context::new("c")));
        assert_eq!(dedup.len(), 2);

        assert!(!dedup.process_context(&Context::new("c")));
        assert!(!dedup.process_context(&Context::new("b")));
        assert!(dedup.process_context(&Context::new("a")));
    }

    #[test]
    fn test_flush_resets() {
        let dedup = DefaultContextDeduplicator::new(10, Duration::from_secs(300));
        let before = dedup.last_flush();
        let context = Context::new("user-1");
        assert!(dedup.process_context(&context));

        std::thread::sleep(Duration::from_millis(5));
        dedup.flush();

        assert!(dedup.is_empty());
        assert!(dedup.last_flush() > before);
        assert!(dedup.process_context(&context));
    }

    #[test]
    fn test_flush_interval_exposed() {
        let dedup = DefaultContextDeduplicator::new(10, Duration::from_secs(42));
        assert_eq!(dedup.flush_interval(), Some(Duration::from_secs(42)));
    }
}
