//! Monitor-style synchronization: a mutex-guarded state plus one condition
//! variable, with contention counters behind the `--print-cctrs` option.
//!
//! Every shared field of the pipelines lives inside exactly one monitor
//! and is only touched through it; the counters record how often each side
//! entered to consume (`checks`) and how often it actually had to block
//! (`waits`), which is the tuning signal for slot and worker counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

pub struct Monitor<T> {
    state: Mutex<T>,
    cond: Condvar,
    checks: AtomicU64,
    waits: AtomicU64,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Monitor {
            state: Mutex::new(state),
            cond: Condvar::new(),
            checks: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    /// Enter the monitor without predicate intent (producer side).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap()
    }

    /// Enter the monitor intending to test a consume predicate; counted.
    pub fn lock_pred(&self) -> MutexGuard<'_, T> {
        self.checks.fetch_add(1, Ordering::Relaxed);
        self.state.lock().unwrap()
    }

    /// Block until signalled; counted as a stall.
    pub fn wait<'a>(&'a self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.waits.fetch_add(1, Ordering::Relaxed);
        self.cond.wait(guard).unwrap()
    }

    /// Wake one waiter.
    pub fn signal(&self) {
        self.cond.notify_one();
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        self.cond.notify_all();
    }

    /// `(checks, waits)` so far.
    pub fn counters(&self) -> (u64, u64) {
        (self.checks.load(Ordering::Relaxed), self.waits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_track_checks_and_waits() {
        let m = Arc::new(Monitor::new(0u32));

        {
            let g = m.lock_pred();
            assert_eq!(*g, 0);
        }
        assert_eq!(m.counters(), (1, 0));

        let m2 = Arc::clone(&m);
        let t = std::thread::spawn(move || {
            let mut g = m2.lock_pred();
            while *g == 0 {
                g = m2.wait(g);
            }
            *g
        });

        // Let the consumer reach its wait, then produce.
        std::thread::sleep(std::time::Duration::from_millis(30));
        {
            let mut g = m.lock();
            *g = 7;
        }
        m.signal();
        assert_eq!(t.join().unwrap(), 7);

        let (checks, waits) = m.counters();
        assert_eq!(checks, 2);
        assert!(waits >= 1);
    }

    #[test]
    fn broadcast_wakes_all() {
        let m = Arc::new(Monitor::new(false));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&m);
            handles.push(std::thread::spawn(move || {
                let mut g = m.lock_pred();
                while !*g {
                    g = m.wait(g);
                }
            }));
        }
        std::thread::sleep(std::time::Duration::from_millis(30));
        *m.lock() = true;
        m.broadcast();
        for h in handles {
            h.join().unwrap();
        }
    }
}
