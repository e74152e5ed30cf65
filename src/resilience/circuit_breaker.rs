//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: bounded probes test whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive failures reach the threshold
//! Open → Half-Open:   open window elapsed on next arrival
//! Half-Open → Closed: a probe succeeds
//! Half-Open → Open:   a probe fails
//! ```
//!
//! The admission decision and the completion bookkeeping are two separate
//! short critical sections with the proxy call in between; the lock is never
//! held across I/O. A probe permit dropped without completing releases its
//! half-open slot without recording success or failure.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_max_in_flight: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Per-route three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Admission decision for one request.
pub enum Admission {
    Admitted(BreakerPermit),
    Rejected { retry_after: Duration },
}

/// Proof of admission. Completing it feeds the observed outcome back into
/// the state machine; dropping it without completing (a cancelled request)
/// only releases the half-open slot.
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    completed: bool,
}

/// Read-only snapshot for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failures: u32,
    pub retry_after_seconds: u64,
    pub half_open_in_flight: u32,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a request may proceed.
    pub fn acquire(self: &Arc<Self>) -> Admission {
        self.acquire_at(Instant::now())
    }

    pub(crate) fn acquire_at(self: &Arc<Self>, now: Instant) -> Admission {
        let mut inner = self.lock();
        loop {
            match inner.state {
                BreakerState::Closed => {
                    return Admission::Admitted(BreakerPermit {
                        breaker: Arc::clone(self),
                        probe: false,
                        completed: false,
                    });
                }
                BreakerState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(opened_at);
                    if elapsed >= self.cfg.open_duration {
                        inner.state = BreakerState::HalfOpen;
                        inner.consecutive_failures = 0;
                        inner.half_open_in_flight = 0;
                        continue;
                    }
                    return Admission::Rejected {
                        retry_after: self.cfg.open_duration - elapsed,
                    };
                }
                BreakerState::HalfOpen => {
                    if inner.half_open_in_flight >= self.cfg.half_open_max_in_flight {
                        return Admission::Rejected {
                            retry_after: Duration::from_secs(1),
                        };
                    }
                    inner.half_open_in_flight += 1;
                    return Admission::Admitted(BreakerPermit {
                        breaker: Arc::clone(self),
                        probe: true,
                        completed: false,
                    });
                }
            }
        }
    }

    fn complete(&self, probe: bool, success: bool, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.cfg.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(now);
                    }
                }
            }
            BreakerState::HalfOpen => {
                // Completions of requests admitted before the outage window
                // carry no signal about recovery.
                if !probe {
                    return;
                }
                if inner.half_open_in_flight > 0 {
                    inner.half_open_in_flight -= 1;
                }
                if success {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                } else {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.consecutive_failures = self.cfg.failure_threshold;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn cancel(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen && inner.half_open_in_flight > 0 {
            inner.half_open_in_flight -= 1;
        }
    }

    pub fn stats(&self) -> BreakerStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> BreakerStats {
        let inner = self.lock();
        let retry = match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(opened_at)) => {
                let rem = self
                    .cfg
                    .open_duration
                    .saturating_sub(now.saturating_duration_since(opened_at));
                rem.as_millis().div_ceil(1000) as u64
            }
            _ => 0,
        };
        BreakerStats {
            state: inner.state,
            failures: inner.consecutive_failures,
            retry_after_seconds: retry,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }
}

impl BreakerPermit {
    /// Record the observed outcome: success is any status below 500.
    pub fn complete(mut self, success: bool) {
        self.complete_at(success, Instant::now());
    }

    pub(crate) fn complete_at(&mut self, success: bool, now: Instant) {
        if !self.completed {
            self.completed = true;
            self.breaker.complete(self.probe, success, now);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.cancel(self.probe);
        }
    }
}
