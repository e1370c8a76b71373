use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counts outstanding workers and lets other threads wait for them to finish.
///
/// ```
/// use strand_core::sync::WaitGroup;
///
/// let wg = WaitGroup::new();
/// let guard = wg.enter();
/// let worker = std::thread::spawn(move || drop(guard));
/// wg.wait();
/// worker.join().unwrap();
/// assert_eq!(wg.count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        *self.inner.0.lock() += n;
    }

    /// Marks one worker finished.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero.
    pub fn done(&self) {
        let (count, cvar) = &*self.inner;
        let mut count = count.lock();
        assert!(*count > 0, "WaitGroup counter went negative");
        *count -= 1;
        if *count == 0 {
            cvar.notify_all();
        }
    }

    /// Adds one worker and returns a guard that calls [`done`](Self::done) on drop.
    pub fn enter(&self) -> WaitGroupGuard {
        self.add(1);
        WaitGroupGuard { group: self.clone() }
    }

    pub fn count(&self) -> usize {
        *self.inner.0.lock()
    }

    /// Blocks until the counter reaches zero.
    pub fn wait(&self) {
        let (count, cvar) = &*self.inner;
        let mut count = count.lock();
        while *count > 0 {
            cvar.wait(&mut count);
        }
    }

    /// Blocks until the counter reaches zero or `timeout` elapses.
    /// Returns `true` if the counter reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (count, cvar) = &*self.inner;
        let mut count = count.lock();
        while *count > 0 {
            if cvar.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .finish()
    }
}

/// Calls [`WaitGroup::done`] when dropped, including during unwinding.
#[must_use = "dropping the guard immediately marks the worker finished"]
pub struct WaitGroupGuard {
    group: WaitGroup,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        self.group.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_after_all_done() {
        let wg = WaitGroup::new();
        wg.add(3);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let wg = wg.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    wg.done();
                })
            })
            .collect();
        wg.wait();
        assert_eq!(wg.count(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_timeout_expires() {
        let wg = WaitGroup::new();
        let _guard = wg.enter();
        assert!(!wg.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_on_empty_group_returns_immediately() {
        let wg = WaitGroup::new();
        wg.wait();
        assert!(wg.wait_timeout(Duration::ZERO));
    }

    #[test]
    #[should_panic(expected = "WaitGroup counter went negative")]
    fn done_below_zero_panics() {
        WaitGroup::new().done();
    }
}
