use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::time::Instant;

use super::{KeyTtl, KvBackend};
use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process backend with Redis expiry semantics.
///
/// Expiry runs on the Tokio clock, so paused-time tests can advance it.
/// Every command is counted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    commands: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands received so far.
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// Live keys, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the command and fail once closed.
    fn begin(&self) -> BackendResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, e| e.is_live(now));
        Ok(entries)
    }
}

fn deadline(expiry: TimeDelta) -> Option<Instant> {
    expiry.to_std().ok().map(|d| Instant::now() + d)
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.begin()?.contains_key(key))
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.begin()?.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Option<TimeDelta>) -> BackendResult<()> {
        let mut entries = self.begin()?;
        let expires_at = match expiry {
            None => None,
            Some(expiry) if expiry > TimeDelta::zero() => deadline(expiry),
            Some(_) => {
                entries.remove(key);
                return Ok(());
            }
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, expiry: TimeDelta) -> BackendResult<()> {
        let mut entries = self.begin()?;
        if expiry <= TimeDelta::zero() {
            entries.remove(key);
        } else if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = deadline(expiry);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> BackendResult<KeyTtl> {
        let entries = self.begin()?;
        let ttl = match entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::NoExpiry,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let left = at.saturating_duration_since(Instant::now());
                // TTL replies are whole seconds, rounded to nearest.
                let secs = (left.as_millis() + 500) / 1000;
                KeyTtl::from_reply(i64::try_from(secs).unwrap_or(i64::MAX))
            }
        };
        Ok(ttl)
    }

    async fn del(&self, keys: &[String]) -> BackendResult<()> {
        let mut entries = self.begin()?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn flush_db(&self) -> BackendResult<()> {
        self.begin()?.clear();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_the_tokio_clock() {
        let backend = MemoryBackend::new();
        backend
            .set("a", b"aa", Some(TimeDelta::seconds(5)))
            .await
            .unwrap();
        assert!(backend.exists("a").await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!backend.exists("a").await.unwrap());
        assert_eq!(backend.ttl("a").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_reports_whole_seconds() {
        let backend = MemoryBackend::new();
        backend.set("a", b"aa", None).await.unwrap();
        backend.expire("a", TimeDelta::seconds(10)).await.unwrap();
        assert_eq!(
            backend.ttl("a").await.unwrap(),
            KeyTtl::ExpiresIn(Duration::from_secs(10))
        );
        backend.set("b", b"bb", None).await.unwrap();
        assert_eq!(backend.ttl("b").await.unwrap(), KeyTtl::NoExpiry);
    }

    #[tokio::test]
    async fn non_positive_expiry_removes_key() {
        let backend = MemoryBackend::new();
        backend
            .set("a", b"aa", Some(TimeDelta::seconds(-1)))
            .await
            .unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);

        backend.set("b", b"bb", None).await.unwrap();
        backend.expire("b", TimeDelta::zero()).await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn expire_on_missing_key_is_a_no_op() {
        let backend = MemoryBackend::new();
        backend.expire("ghost", TimeDelta::seconds(10)).await.unwrap();
        assert!(!backend.exists("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn closed_backend_rejects_commands() {
        let backend = MemoryBackend::new();
        backend.close().await;
        backend.close().await;
        assert!(matches!(
            backend.get("a").await,
            Err(BackendError::Closed)
        ));
        assert_eq!(backend.commands(), 1);
    }
}
