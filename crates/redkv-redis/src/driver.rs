//! Redis implementation of the [`Storage`] contract.
//!
//! Every operation validates its whole input before the first backend
//! command. Multi-key loops run sequentially and stop at the first backend
//! failure, except `mexpire`, which applies expiries best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redkv_core::validate::{plan_expiries, plan_writes, validate_key, validate_keys};
use redkv_core::ttl::deadline_after;
use redkv_core::{Configurer, Item, KvError, KvResult, Op, Storage, unmarshal_key};

use crate::backend::{KeyTtl, KvBackend, RedisBackend};
use crate::config::RedisConfig;
use crate::metrics::PoolCollector;
use crate::tls::build_security_context;

/// KV driver over a Redis deployment, or any other [`KvBackend`].
pub struct RedisDriver<B = RedisBackend> {
    backend: B,
}

impl RedisDriver<RedisBackend> {
    /// Apply defaults, validate, build the TLS context and the pool.
    ///
    /// Fails fast on invalid configuration or TLS material. No connection is
    /// opened here.
    pub fn new(mut config: RedisConfig) -> KvResult<Self> {
        config.init_defaults();
        config.validate()?;
        let security = build_security_context(config.tls.as_ref())?;

        tracing::info!(
            deployment = ?config.deployment(),
            addrs = ?config.addrs,
            db = config.db,
            pool_size = config.pool_size,
            replica_reads = config.replica_reads(),
            tls = security.is_some(),
            "redis driver initialized"
        );

        let backend = RedisBackend::new(Arc::new(config), security)?;
        Ok(Self::with_backend(backend))
    }

    /// Build a driver from the configuration section at `key`.
    pub fn from_configurer(key: &str, configurer: &dyn Configurer) -> KvResult<Self> {
        let config: RedisConfig = unmarshal_key(configurer, key)?;
        Self::new(config)
    }
}

impl<B: KvBackend> RedisDriver<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Pool health collector, when the backend owns a pool.
    pub fn metrics_collector(&self) -> Option<PoolCollector> {
        self.backend.metrics_collector()
    }
}

#[async_trait]
impl<B: KvBackend> Storage for RedisDriver<B> {
    #[tracing::instrument(name = "redis:has", skip_all, fields(keys = keys.len()), err)]
    async fn has(&self, keys: &[String]) -> KvResult<HashMap<String, bool>> {
        validate_keys(Op::Has, keys)?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let exists = self
                .backend
                .exists(key)
                .await
                .map_err(|e| KvError::backend(Op::Has, e))?;
            if exists {
                found.insert(key.clone(), true);
            }
        }
        Ok(found)
    }

    #[tracing::instrument(name = "redis:get", skip_all, err)]
    async fn get(&self, key: &str) -> KvResult<Vec<u8>> {
        validate_key(Op::Get, key)?;
        self.backend
            .get(key)
            .await
            .map_err(|e| KvError::backend(Op::Get, e))?
            .ok_or_else(|| KvError::NotFound {
                op: Op::Get,
                key: key.to_string(),
            })
    }

    #[tracing::instrument(name = "redis:mget", skip_all, fields(keys = keys.len()), err)]
    async fn mget(&self, keys: &[String]) -> KvResult<HashMap<String, Vec<u8>>> {
        validate_keys(Op::MGet, keys)?;
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self
                .backend
                .get(key)
                .await
                .map_err(|e| KvError::backend(Op::MGet, e))?;
            if let Some(value) = value {
                values.insert(key.clone(), value);
            }
        }
        Ok(values)
    }

    #[tracing::instrument(name = "redis:set", skip_all, fields(items = items.len()), err)]
    async fn set(&self, items: &[Item]) -> KvResult<()> {
        let writes = plan_writes(items, Utc::now())?;
        for write in writes {
            self.backend
                .set(write.key, write.value, write.expiry)
                .await
                .map_err(|e| KvError::backend(Op::Set, e))?;
        }
        Ok(())
    }

    #[tracing::instrument(name = "redis:mexpire", skip_all, fields(items = items.len()), err)]
    async fn mexpire(&self, items: &[Item]) -> KvResult<()> {
        let expiries = plan_expiries(items, Utc::now())?;
        for expiry in expiries {
            if let Err(error) = self.backend.expire(expiry.key, expiry.expiry).await {
                tracing::warn!(key = expiry.key, %error, "failed to apply expiry");
            }
        }
        Ok(())
    }

    #[tracing::instrument(name = "redis:ttl", skip_all, fields(keys = keys.len()), err)]
    async fn ttl(&self, keys: &[String]) -> KvResult<HashMap<String, String>> {
        validate_keys(Op::Ttl, keys)?;
        let mut deadlines = HashMap::with_capacity(keys.len());
        for key in keys {
            let ttl = self
                .backend
                .ttl(key)
                .await
                .map_err(|e| KvError::backend(Op::Ttl, e))?;
            if let KeyTtl::ExpiresIn(remaining) = ttl {
                deadlines.insert(key.clone(), deadline_after(Utc::now(), remaining));
            }
        }
        Ok(deadlines)
    }

    #[tracing::instrument(name = "redis:delete", skip_all, fields(keys = keys.len()), err)]
    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        validate_keys(Op::Delete, keys)?;
        self.backend
            .del(keys)
            .await
            .map_err(|e| KvError::backend(Op::Delete, e))
    }

    #[tracing::instrument(name = "redis:clear", skip_all, err)]
    async fn clear(&self) -> KvResult<()> {
        self.backend
            .flush_db()
            .await
            .map_err(|e| KvError::backend(Op::Clear, e))
    }

    async fn stop(&self) {
        self.backend.close().await;
        tracing::debug!("redis driver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::{DateTime, TimeDelta};

    fn driver() -> RedisDriver<MemoryBackend> {
        RedisDriver::with_backend(MemoryBackend::new())
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn has_omits_absent_keys() {
        let d = driver();
        d.set(&[Item::new("a", "aa"), Item::new("b", "bb")])
            .await
            .unwrap();
        let found = d.has(&keys(&["a", "b", "c"])).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(!found.contains_key("c"));
    }

    #[tokio::test]
    async fn get_surfaces_not_found() {
        let d = driver();
        match d.get("missing").await {
            Err(KvError::NotFound { op, key }) => {
                assert_eq!(op, Op::Get);
                assert_eq!(key, "missing");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mget_skips_absent_keys() {
        let d = driver();
        d.set(&[Item::new("a", "aa")]).await.unwrap();
        let values = d.mget(&keys(&["a", "b"])).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["a"], b"aa");
    }

    #[tokio::test]
    async fn blank_key_aborts_before_any_command() {
        let d = driver();
        let bad = keys(&["a", "  ", "c"]);
        assert!(matches!(d.has(&bad).await, Err(KvError::EmptyKey { index: 1, .. })));
        assert!(matches!(d.mget(&bad).await, Err(KvError::EmptyKey { .. })));
        assert!(matches!(d.ttl(&bad).await, Err(KvError::EmptyKey { .. })));
        assert!(matches!(d.delete(&bad).await, Err(KvError::EmptyKey { .. })));
        assert!(matches!(d.get(" ").await, Err(KvError::EmptyKey { .. })));
        let items = vec![Item::new("a", "aa"), Item::new("", "bb")];
        assert!(matches!(d.set(&items).await, Err(KvError::EmptyKey { .. })));
        assert_eq!(d.backend().commands(), 0);
    }

    #[tokio::test]
    async fn empty_lists_are_rejected() {
        let d = driver();
        assert!(matches!(
            d.has(&[]).await,
            Err(KvError::NoKeysProvided { op: Op::Has })
        ));
        assert!(matches!(
            d.set(&[]).await,
            Err(KvError::NoKeysProvided { op: Op::Set })
        ));
        assert!(d.mexpire(&[]).await.is_ok());
        assert_eq!(d.backend().commands(), 0);
    }

    #[tokio::test]
    async fn bad_timestamp_writes_nothing() {
        let d = driver();
        let items = vec![
            Item::new("a", "aa"),
            Item::new("b", "bb").with_timeout("next tuesday"),
        ];
        assert!(matches!(
            d.set(&items).await,
            Err(KvError::TimestampParse { op: Op::Set, .. })
        ));
        assert_eq!(d.backend().commands(), 0);
    }

    #[tokio::test]
    async fn past_deadline_leaves_key_expired() {
        let d = driver();
        let item = Item::new("a", "aa").with_deadline(Utc::now() - TimeDelta::seconds(5));
        d.set(&[item]).await.unwrap();
        assert!(d.has(&keys(&["a"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ttl_round_trips_deadline() {
        let d = driver();
        let deadline = Utc::now() + TimeDelta::seconds(60);
        d.set(&[Item::new("a", "aa").with_deadline(deadline), Item::new("b", "bb")])
            .await
            .unwrap();
        let ttl = d.ttl(&keys(&["a", "b", "c"])).await.unwrap();
        assert_eq!(ttl.len(), 1);
        let reported = DateTime::parse_from_rfc3339(&ttl["a"]).unwrap();
        let drift = (reported.with_timezone(&Utc) - deadline).num_seconds().abs();
        assert!(drift <= 2, "drift {drift}s");
    }

    #[tokio::test]
    async fn clear_is_repeatable() {
        let d = driver();
        d.set(&[Item::new("a", "aa")]).await.unwrap();
        d.clear().await.unwrap();
        d.clear().await.unwrap();
        assert!(d.backend().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminal() {
        let d = driver();
        d.stop().await;
        d.stop().await;
        assert!(matches!(
            d.has(&keys(&["a"])).await,
            Err(KvError::Backend { op: Op::Has, .. })
        ));
    }

    #[tokio::test]
    async fn custom_backend_has_no_collector() {
        assert!(driver().metrics_collector().is_none());
    }
}
