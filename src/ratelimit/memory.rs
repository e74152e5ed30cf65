//! In-process token-bucket backend.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::ratelimit::{retry_after_seconds, Decision, Limiter, LimiterError};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Token buckets keyed by principal, with TTL eviction of idle entries.
///
/// The map is only locked to create an entry on first use; after that the
/// bucket arithmetic runs under its own entry-level mutex.
pub struct MemoryLimiter {
    buckets: Arc<DashMap<String, Arc<Mutex<Bucket>>>>,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryLimiter {
    /// Create a limiter that evicts buckets idle longer than `ttl`,
    /// sweeping every `cleanup_every`.
    pub fn new(ttl: Duration, cleanup_every: Duration) -> Self {
        let buckets: Arc<DashMap<String, Arc<Mutex<Bucket>>>> = Arc::new(DashMap::new());

        let sweep_map = Arc::clone(&buckets);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(cleanup_every.max(Duration::from_millis(10)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                sweep(&sweep_map, ttl);
            }
        });

        Self {
            buckets,
            ttl,
            sweeper: Mutex::new(Some(handle)),
        }
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Run one eviction pass immediately.
    pub fn sweep_now(&self) {
        sweep(&self.buckets, self.ttl);
    }
}

fn sweep(buckets: &DashMap<String, Arc<Mutex<Bucket>>>, ttl: Duration) {
    let now = Instant::now();
    buckets.retain(|_, entry| match entry.lock() {
        Ok(b) => now.duration_since(b.last_seen) <= ttl,
        Err(_) => false,
    });
}

#[async_trait]
impl Limiter for MemoryLimiter {
    async fn allow(
        &self,
        key: &str,
        rps: f64,
        burst: f64,
        cost: u32,
    ) -> Result<Decision, LimiterError> {
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: burst,
                    last_refill: Instant::now(),
                    last_seen: Instant::now(),
                }))
            })
            .clone();

        let cost = f64::from(cost);
        let mut b = entry.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(b.last_refill).as_secs_f64();
        b.tokens = (b.tokens + elapsed * rps).min(burst);
        b.last_refill = now;
        b.last_seen = now;

        if b.tokens >= cost {
            b.tokens -= cost;
            Ok(Decision {
                allowed: true,
                remaining: b.tokens,
                retry_after_seconds: 0,
                limit_rps: rps,
                burst,
            })
        } else {
            let missing = cost - b.tokens;
            Ok(Decision {
                allowed: false,
                remaining: b.tokens,
                retry_after_seconds: retry_after_seconds(missing, rps),
                limit_rps: rps,
                burst,
            })
        }
    }

    async fn close(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl Drop for MemoryLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
