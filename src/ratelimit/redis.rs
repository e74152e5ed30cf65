//! Shared token-bucket backend on Redis.
//!
//! The whole read-refill-decide-write cycle runs as one server-side Lua
//! script, so gateways sharing the store observe a serializable order for
//! each key. Splitting the read-modify-write across two round trips would
//! let two replicas each grant the last token.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::ratelimit::{Decision, Limiter, LimiterError};

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local burst = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local data = redis.call("HMGET", key, "tokens", "ts")
local tokens = tonumber(data[1])
local ts = tonumber(data[2])

if tokens == nil then
  tokens = burst
  ts = now_ms
else
  local delta = math.max(0, now_ms - ts)
  tokens = math.min(burst, tokens + (delta / 1000.0) * rate)
  ts = now_ms
end

local allowed = 0
local retry_ms = 0

if tokens >= cost then
  allowed = 1
  tokens = tokens - cost
else
  local missing = cost - tokens
  if rate > 0 then
    retry_ms = math.ceil((missing / rate) * 1000.0)
  else
    retry_ms = 1000
  end
end

redis.call("HMSET", key, "tokens", tokens, "ts", ts)
redis.call("PEXPIRE", key, 300000)
return {allowed, tostring(tokens), retry_ms}
"#;

/// Limiter backed by a shared Redis store.
pub struct RedisLimiter {
    conn: ConnectionManager,
    script: Script,
}

impl RedisLimiter {
    /// Connect to the store. Fails fast when the store is unreachable so
    /// callers can fall back to the in-process backend.
    pub async fn connect(addr: &str, password: &str, db: i64) -> Result<Self, LimiterError> {
        let url = if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        };
        let client = redis::Client::open(url).map_err(LimiterError::Redis)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(LimiterError::Redis)?;
        Ok(Self {
            conn,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }
}

#[async_trait]
impl Limiter for RedisLimiter {
    async fn allow(
        &self,
        key: &str,
        rps: f64,
        burst: f64,
        cost: u32,
    ) -> Result<Decision, LimiterError> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut conn = self.conn.clone();
        let (allowed, tokens, retry_ms): (i64, String, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(rps)
            .arg(burst)
            .arg(cost)
            .invoke_async(&mut conn)
            .await?;

        let remaining: f64 = tokens
            .parse()
            .map_err(|_| LimiterError::BadReply(format!("non-numeric tokens {tokens:?}")))?;

        let allowed = allowed == 1;
        Ok(Decision {
            allowed,
            remaining,
            retry_after_seconds: if allowed {
                0
            } else {
                ((retry_ms.max(0) as u64) + 999) / 1000
            },
            limit_rps: rps,
            burst,
        })
    }

    async fn close(&self) {
        // Connections are dropped with the manager; nothing to stop.
    }
}
