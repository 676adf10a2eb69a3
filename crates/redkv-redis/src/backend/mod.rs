//! Storage backends used by [`RedisDriver`](crate::RedisDriver).
//!
//! A backend speaks in single commands; validation, deadline conversion and
//! the per-operation error policy live in the driver.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::error::BackendResult;
use crate::metrics::PoolCollector;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Time-to-live of a key as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

impl KeyTtl {
    /// Decode a `TTL` reply: -2 for no such key, -1 for no expiry.
    pub fn from_reply(seconds: i64) -> Self {
        match seconds {
            -1 => KeyTtl::NoExpiry,
            s if s < 0 => KeyTtl::Missing,
            s => KeyTtl::ExpiresIn(Duration::from_secs(s.unsigned_abs())),
        }
    }
}

/// Command set a KV backend must provide.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn exists(&self, key: &str) -> BackendResult<bool>;

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Write `value`. A non-positive `expiry` leaves the key expired.
    async fn set(&self, key: &str, value: &[u8], expiry: Option<TimeDelta>) -> BackendResult<()>;

    /// Set a relative expiry. A non-positive `expiry` removes the key.
    async fn expire(&self, key: &str, expiry: TimeDelta) -> BackendResult<()>;

    async fn ttl(&self, key: &str) -> BackendResult<KeyTtl>;

    async fn del(&self, keys: &[String]) -> BackendResult<()>;

    async fn flush_db(&self) -> BackendResult<()>;

    async fn close(&self);

    /// Pool metrics, for backends that own a connection pool.
    fn metrics_collector(&self) -> Option<PoolCollector> {
        None
    }
}

/// Milliseconds for `PX`/`PEXPIRE`. Positive sub-millisecond values round
/// up so they never turn into a deletion.
pub(crate) fn expiry_millis(expiry: TimeDelta) -> i64 {
    let millis = expiry.num_milliseconds();
    if expiry > TimeDelta::zero() {
        millis.max(1)
    } else {
        millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-2, KeyTtl::Missing)]
    #[case(-1, KeyTtl::NoExpiry)]
    #[case(0, KeyTtl::ExpiresIn(Duration::ZERO))]
    #[case(42, KeyTtl::ExpiresIn(Duration::from_secs(42)))]
    fn ttl_reply_decoding(#[case] reply: i64, #[case] expected: KeyTtl) {
        assert_eq!(KeyTtl::from_reply(reply), expected);
    }

    #[rstest]
    #[case(TimeDelta::seconds(5), 5_000)]
    #[case(TimeDelta::microseconds(300), 1)]
    #[case(TimeDelta::zero(), 0)]
    #[case(TimeDelta::seconds(-3), -3_000)]
    fn expiry_millis_keeps_sign(#[case] expiry: TimeDelta, #[case] expected: i64) {
        assert_eq!(expiry_millis(expiry), expected);
    }
}
