use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use deadpool::managed;
use redis::{Cmd, FromRedisValue};
use redkv_core::{KvError, KvResult};

use super::{KeyTtl, KvBackend, expiry_millis};
use crate::config::{Deployment, RedisConfig};
use crate::error::{BackendError, BackendResult};
use crate::metrics::PoolCollector;
use crate::pool::{
    PoolStats, PooledConnection, RedisPool, Role, build_pool, checkout, retry_idempotent,
};
use crate::tls::SecurityContext;

/// Redis backend over a pooled connection set.
///
/// `EXISTS`, `GET`, `TTL`, `DEL` and `FLUSHDB` are retried on transport
/// failures; writes and expiries run once. Sentinel deployments with replica
/// reads enabled send `EXISTS`, `GET` and `TTL` to a replica pool.
pub struct RedisBackend {
    config: Arc<RedisConfig>,
    pool: RedisPool,
    replicas: Option<RedisPool>,
    stats: Arc<PoolStats>,
    collector: PoolCollector,
}

impl RedisBackend {
    /// Build the pool. No connection is opened until first use, apart from
    /// `min_idle_conns` warm-up in the background when a runtime is present.
    pub fn new(config: Arc<RedisConfig>, security: Option<SecurityContext>) -> KvResult<Self> {
        let stats = Arc::new(PoolStats::default());
        let replicas = if config.deployment() == Deployment::Sentinel && config.replica_reads() {
            Some(build_pool(
                Arc::clone(&config),
                security.clone(),
                Arc::clone(&stats),
                Role::Replica,
            )?)
        } else {
            None
        };
        let pool = build_pool(
            Arc::clone(&config),
            security,
            Arc::clone(&stats),
            Role::Primary,
        )?;
        let collector = PoolCollector::new(pool.clone(), Arc::clone(&stats))
            .map_err(|e| KvError::Config(format!("redis: pool metrics: {e}")))?;

        if config.min_idle_conns > 0 {
            warm_up(&pool, config.min_idle_conns);
        }

        Ok(Self {
            config,
            pool,
            replicas,
            stats,
            collector,
        })
    }

    pub fn status(&self) -> deadpool::Status {
        self.pool.status()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Whether reads go to sentinel-resolved replicas.
    pub fn reads_from_replicas(&self) -> bool {
        self.replicas.is_some()
    }

    async fn conn(&self) -> BackendResult<PooledConnection> {
        checkout(&self.pool, &self.stats).await
    }

    fn read_pool(&self) -> &RedisPool {
        self.replicas.as_ref().unwrap_or(&self.pool)
    }

    /// One attempt. A connection that failed at the transport level is
    /// dropped instead of going back to the pool.
    async fn query_once<T: FromRedisValue>(&self, pool: &RedisPool, cmd: &Cmd) -> BackendResult<T> {
        let mut conn = checkout(pool, &self.stats).await?;
        match cmd.query_async(&mut *conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let error = BackendError::from(e);
                if error.is_retryable() {
                    drop(managed::Object::take(conn));
                }
                Err(error)
            }
        }
    }

    async fn query_idempotent<T: FromRedisValue>(
        &self,
        pool: &RedisPool,
        cmd: &Cmd,
    ) -> BackendResult<T> {
        retry_idempotent(&self.config, move || self.query_once(pool, cmd)).await
    }
}

fn warm_up(pool: &RedisPool, count: usize) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no tokio runtime, skipping idle connection warm-up");
        return;
    };
    let pool = pool.clone();
    handle.spawn(async move {
        let mut warmed = Vec::with_capacity(count);
        for _ in 0..count {
            match pool.get().await {
                Ok(conn) => warmed.push(conn),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to warm idle redis connection");
                    break;
                }
            }
        }
        tracing::debug!(warmed = warmed.len(), "warmed idle redis connections");
    });
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let count: i64 = self
            .query_idempotent(self.read_pool(), redis::cmd("EXISTS").arg(key))
            .await?;
        Ok(count > 0)
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.query_idempotent(self.read_pool(), redis::cmd("GET").arg(key))
            .await
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Option<TimeDelta>) -> BackendResult<()> {
        let mut conn = self.conn().await?;
        match expiry {
            None => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async(&mut *conn)
                    .await?;
            }
            Some(expiry) if expiry > TimeDelta::zero() => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(expiry_millis(expiry))
                    .query_async(&mut *conn)
                    .await?;
            }
            // SET rejects a non-positive PX, so write and expire atomically.
            Some(expiry) => {
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("SET")
                    .arg(key)
                    .arg(value)
                    .ignore()
                    .cmd("PEXPIRE")
                    .arg(key)
                    .arg(expiry_millis(expiry))
                    .ignore()
                    .query_async(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn expire(&self, key: &str, expiry: TimeDelta) -> BackendResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(expiry_millis(expiry))
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> BackendResult<KeyTtl> {
        let seconds: i64 = self
            .query_idempotent(self.read_pool(), redis::cmd("TTL").arg(key))
            .await?;
        Ok(KeyTtl::from_reply(seconds))
    }

    async fn del(&self, keys: &[String]) -> BackendResult<()> {
        let _: i64 = self
            .query_idempotent(&self.pool, redis::cmd("DEL").arg(keys))
            .await?;
        Ok(())
    }

    async fn flush_db(&self) -> BackendResult<()> {
        let _: () = self
            .query_idempotent(&self.pool, &redis::cmd("FLUSHDB"))
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
        if let Some(replicas) = &self.replicas {
            replicas.close();
        }
    }

    fn metrics_collector(&self) -> Option<PoolCollector> {
        Some(self.collector.clone())
    }
}
