//! Counter-based completion tracking.
//!
//! A [`Counter`] starts at the number of outstanding units of work and is
//! decremented as each finishes. Threads block in [`Counter::wait`] until it
//! reaches zero. Batches use one to join their worker loops.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct InnerCounter {
    value: Mutex<usize>,
    zero: Condvar,
}

/// A thread-safe countdown counter for tracking job completion.
///
/// Clones share the same count. Workers should hold their own clone so the
/// counter outlives any waiter that returns as soon as it sees zero.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<InnerCounter>,
}

impl Counter {
    /// Creates a new counter with the specified initial value.
    pub fn new(initial: usize) -> Self {
        Counter {
            inner: Arc::new(InnerCounter {
                value: Mutex::new(initial),
                zero: Condvar::new(),
            }),
        }
    }

    /// Increments the counter by one.
    pub fn increment(&self) {
        *self.inner.value.lock() += 1;
    }

    /// Decrements the counter by one and wakes all waiters if it reached zero.
    ///
    /// Returns true if the counter reached zero. Decrementing a counter that
    /// is already zero is a no-op and returns false.
    pub fn decrement(&self) -> bool {
        let mut value = self.inner.value.lock();
        if *value == 0 {
            return false;
        }
        *value -= 1;
        if *value == 0 {
            self.inner.zero.notify_all();
            true
        } else {
            false
        }
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> usize {
        *self.inner.value.lock()
    }

    /// Checks if the counter has reached zero.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }

    /// Blocks the calling thread until the counter reaches zero.
    pub fn wait(&self) {
        let mut value = self.inner.value.lock();
        while *value != 0 {
            self.inner.zero.wait(&mut value);
        }
    }

    /// Blocks until the counter reaches zero or `timeout` elapses.
    ///
    /// Returns true if the counter reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = self.inner.value.lock();
        while *value != 0 {
            if self.inner.zero.wait_until(&mut value, deadline).timed_out() {
                return *value == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").field("value", &self.value()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new(5);
        assert_eq!(counter.value(), 5);
        assert!(!counter.is_complete());

        counter.decrement();
        assert_eq!(counter.value(), 4);

        counter.increment();
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn test_counter_completion() {
        let counter = Counter::new(1);
        assert!(!counter.is_complete());

        assert!(counter.decrement());
        assert!(counter.is_complete());
        assert!(!counter.decrement());
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_wait_blocks_until_zero() {
        let counter = Counter::new(4);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = counter.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    c.decrement();
                })
            })
            .collect();

        counter.wait();
        assert!(counter.is_complete());
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_wait_timeout_expires() {
        let counter = Counter::new(1);
        assert!(!counter.wait_timeout(Duration::from_millis(20)));
        counter.decrement();
        assert!(counter.wait_timeout(Duration::from_millis(20)));
    }
}
