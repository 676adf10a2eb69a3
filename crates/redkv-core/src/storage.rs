//! The storage contract every KV driver implements.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::KvResult;
use crate::item::Item;

/// Uniform key-value operation set.
///
/// Multi-key operations validate their whole input before touching the
/// backend. Result maps only contain keys that exist.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Existence check. Absent keys are omitted, never mapped to `false`.
    async fn has(&self, keys: &[String]) -> KvResult<HashMap<String, bool>>;

    /// Value of one key. An absent key is [`KvError::NotFound`](crate::KvError::NotFound).
    async fn get(&self, key: &str) -> KvResult<Vec<u8>>;

    /// Values for the keys that exist; absent keys are skipped.
    async fn mget(&self, keys: &[String]) -> KvResult<HashMap<String, Vec<u8>>>;

    /// Write items in order. The first backend failure aborts the rest;
    /// items already written stay written.
    async fn set(&self, items: &[Item]) -> KvResult<()>;

    /// Apply absolute deadlines to existing keys. Per-key backend failures
    /// are logged, not returned.
    async fn mexpire(&self, items: &[Item]) -> KvResult<()>;

    /// RFC3339 deadlines for keys that exist and carry an expiry.
    async fn ttl(&self, keys: &[String]) -> KvResult<HashMap<String, String>>;

    /// Remove all given keys in one call.
    async fn delete(&self, keys: &[String]) -> KvResult<()>;

    /// Flush the whole configured keyspace.
    async fn clear(&self) -> KvResult<()>;

    /// Release connections. Idempotent.
    async fn stop(&self);
}
