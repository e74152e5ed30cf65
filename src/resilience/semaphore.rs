//! Non-blocking counting semaphore for per-route in-flight limiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A bounded counter with immediate acquire-or-fail semantics.
///
/// A capacity of 0 disables the gate: `try_acquire` always succeeds and
/// never counts.
#[derive(Debug)]
pub struct Semaphore {
    cap: usize,
    in_use: AtomicUsize,
}

/// RAII permit; releases the slot on drop.
pub struct SemaphorePermit {
    sem: Option<Arc<Semaphore>>,
}

impl Semaphore {
    pub fn new(max_in_flight: usize) -> Arc<Self> {
        Arc::new(Self {
            cap: max_in_flight,
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn enabled(&self) -> bool {
        self.cap > 0
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn in_use(&self) -> usize {
        if self.cap == 0 {
            0
        } else {
            self.in_use.load(Ordering::Relaxed)
        }
    }

    /// Acquire a slot without blocking. Returns `None` when the route is at
    /// capacity.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SemaphorePermit> {
        if self.cap == 0 {
            return Some(SemaphorePermit { sem: None });
        }
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.cap {
                return None;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(SemaphorePermit {
                        sem: Some(Arc::clone(self)),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        if let Some(sem) = self.sem.take() {
            sem.in_use.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_up_to_cap_then_fail() {
        let sem = Semaphore::new(2);
        let p1 = sem.try_acquire().unwrap();
        let p2 = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        assert_eq!(sem.in_use(), 2);

        drop(p1);
        assert_eq!(sem.in_use(), 1);
        let _p3 = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        drop(p2);
    }

    #[test]
    fn zero_capacity_disables_the_gate() {
        let sem = Semaphore::new(0);
        assert!(!sem.enabled());
        let permits: Vec<_> = (0..100).map(|_| sem.try_acquire().unwrap()).collect();
        assert_eq!(sem.in_use(), 0);
        drop(permits);
        assert_eq!(sem.in_use(), 0);
    }

    #[test]
    fn in_use_never_exceeds_cap_under_contention() {
        let sem = Semaphore::new(8);
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let peak = Arc::clone(&peak);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(permit) = sem.try_acquire() {
                            peak.fetch_max(sem.in_use(), Ordering::Relaxed);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::Relaxed) <= 8);
        assert_eq!(sem.in_use(), 0);
    }
}
