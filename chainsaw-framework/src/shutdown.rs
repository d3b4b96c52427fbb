//! Interruptible shutdown signal shared between a worker and its owner.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// a cloneable close flag with an interruptible wait
///
/// Workers call [`Shutdown::wait_timeout`] instead of `thread::sleep` so that
/// [`Shutdown::close`] from another thread wakes them immediately.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    closed: Mutex<bool>,
    wake: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// signal every waiter; idempotent
    pub fn close(&self) {
        let mut closed = self.lock();
        *closed = true;
        self.inner.wake.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.lock()
    }

    /// block for at most `timeout`; returns `true` if the signal was closed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut closed = self.lock();
        while !*closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            closed = match self.inner.wake.wait_timeout(closed, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // a panicking waiter must not wedge shutdown
        self.inner
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_times_out_when_open() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_wakes_waiter_early() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let closed = waiter.wait_timeout(Duration::from_secs(10));
            (closed, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        shutdown.close();
        let (closed, elapsed) = handle.join().unwrap();
        assert!(closed);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_close_is_idempotent() {
        let shutdown = Shutdown::new();
        shutdown.close();
        shutdown.close();
        assert!(shutdown.is_closed());
        assert!(shutdown.wait_timeout(Duration::from_secs(10)));
    }
}
