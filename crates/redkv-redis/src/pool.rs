//! Redis connection pool
//!
//! A `deadpool` managed pool of [`RedisConnection`]s. The manager knows the
//! three deployment shapes: a single node, a sentinel-managed primary
//! (resolved each time a connection is created) and a cluster. Single-node
//! and sentinel connections run over our own TCP or rustls stream so the
//! [`SecurityContext`] applies in full.
//!
//! Sentinel deployments with replica reads enabled get a second pool whose
//! connections go to replicas ([`Role::Replica`]).

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use deadpool::Runtime;
use deadpool::managed::{self, Metrics, Pool, RecycleError, RecycleResult};
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, Pipeline, RedisConnectionInfo, RedisFuture, Value};
use redkv_core::{KvError, KvResult, TlsError};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::{Deployment, RedisConfig};
use crate::error::{BackendError, BackendResult};
use crate::tls::SecurityContext;

/// Pool of Redis connections.
pub type RedisPool = Pool<RedisConnectionManager>;

/// Pooled connection handle.
pub type PooledConnection = managed::Object<RedisConnectionManager>;

/// Which node a sentinel-mode pool connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    /// A healthy replica, falling back to the primary when none is known.
    Replica,
}

/// Pool event counters, shared with the metrics collector.
#[derive(Debug, Default)]
pub struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    stale: AtomicU64,
}

impl PoolStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }
}

enum Inner {
    Single(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// A single-node or cluster connection with a per-command deadline.
pub struct RedisConnection {
    inner: Inner,
    db: i64,
    command_timeout: Duration,
}

fn timed_out(after: Duration) -> redis::RedisError {
    redis::RedisError::from((
        redis::ErrorKind::IoError,
        "command timed out",
        format!("no reply within {after:?}"),
    ))
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        let limit = self.command_timeout;
        Box::pin(async move {
            let fut = match &mut self.inner {
                Inner::Single(conn) => conn.req_packed_command(cmd),
                Inner::Cluster(conn) => conn.req_packed_command(cmd),
            };
            tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| timed_out(limit))?
        })
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        pipeline: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        let limit = self.command_timeout;
        Box::pin(async move {
            let fut = match &mut self.inner {
                Inner::Single(conn) => conn.req_packed_commands(pipeline, offset, count),
                Inner::Cluster(conn) => conn.req_packed_commands(pipeline, offset, count),
            };
            tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| timed_out(limit))?
        })
    }

    fn get_db(&self) -> i64 {
        self.db
    }
}

/// Creates and recycles [`RedisConnection`]s for the pool.
pub struct RedisConnectionManager {
    config: Arc<RedisConfig>,
    security: Option<SecurityContext>,
    cluster: Option<redis::cluster::ClusterClient>,
    stats: Arc<PoolStats>,
    role: Role,
    next_replica: AtomicUsize,
}

impl RedisConnectionManager {
    /// Build a manager for the primary. Performs no network I/O.
    pub fn new(
        config: Arc<RedisConfig>,
        security: Option<SecurityContext>,
        stats: Arc<PoolStats>,
    ) -> KvResult<Self> {
        let cluster = match config.deployment() {
            Deployment::Cluster => Some(cluster_client(&config, security.as_ref())?),
            Deployment::Single | Deployment::Sentinel => None,
        };
        Ok(Self {
            config,
            security,
            cluster,
            stats,
            role: Role::Primary,
            next_replica: AtomicUsize::new(0),
        })
    }

    /// Only sentinel deployments distinguish roles; other shapes ignore it.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    async fn connect(&self) -> BackendResult<RedisConnection> {
        let inner = match (&self.cluster, self.config.deployment()) {
            (Some(client), _) => Inner::Cluster(client.get_async_connection().await?),
            (None, Deployment::Sentinel) => {
                let node = match self.role {
                    Role::Primary => self.resolve_primary().await?,
                    Role::Replica => self.resolve_replica().await?,
                };
                debug!(
                    %node,
                    role = ?self.role,
                    master = %self.config.master_name,
                    "resolved node via sentinel"
                );
                Inner::Single(self.open(&node, &self.node_info()).await?)
            }
            (None, _) => {
                let addr = self.config.addrs.first().map(String::as_str).unwrap_or_default();
                Inner::Single(self.open(addr, &self.node_info()).await?)
            }
        };
        Ok(RedisConnection {
            inner,
            db: self.config.db,
            command_timeout: self.config.command_timeout(),
        })
    }

    fn node_info(&self) -> RedisConnectionInfo {
        RedisConnectionInfo {
            db: self.config.db,
            username: non_empty(&self.config.username),
            password: non_empty(&self.config.password),
            ..Default::default()
        }
    }

    fn sentinel_info(&self) -> RedisConnectionInfo {
        RedisConnectionInfo {
            password: non_empty(&self.config.sentinel_password),
            ..Default::default()
        }
    }

    /// Open a multiplexed connection to `addr`, over TLS when configured.
    async fn open(
        &self,
        addr: &str,
        info: &RedisConnectionInfo,
    ) -> BackendResult<MultiplexedConnection> {
        let connect_err = |source: io::Error| BackendError::Connect {
            addr: addr.to_string(),
            source,
        };
        let tcp = TcpStream::connect(addr).await.map_err(connect_err)?;
        tcp.set_nodelay(true).map_err(connect_err)?;

        let conn = match &self.security {
            Some(security) => {
                let name = server_name(addr).map_err(connect_err)?;
                let stream = security.connect(name, tcp).await.map_err(connect_err)?;
                let (conn, driver) = MultiplexedConnection::new(info, stream).await?;
                tokio::spawn(driver);
                conn
            }
            None => {
                let (conn, driver) = MultiplexedConnection::new(info, tcp).await?;
                tokio::spawn(driver);
                conn
            }
        };
        Ok(conn)
    }

    async fn resolve_primary(&self) -> BackendResult<String> {
        let master = &self.config.master_name;
        let mut last_error = String::from("no sentinel addresses configured");
        for sentinel in &self.config.addrs {
            match self.ask_sentinel(sentinel, master).await {
                Ok(Some((host, port))) => return Ok(host_port(&host, &port.to_string())),
                Ok(None) => last_error = format!("{sentinel} does not know master '{master}'"),
                Err(error) => {
                    warn!(%sentinel, %error, "sentinel unreachable, trying next");
                    last_error = error.to_string();
                }
            }
        }
        Err(BackendError::Sentinel(last_error))
    }

    async fn ask_sentinel(
        &self,
        sentinel: &str,
        master: &str,
    ) -> BackendResult<Option<(String, u16)>> {
        let mut conn = self.open(sentinel, &self.sentinel_info()).await?;
        let reply = redis::cmd("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(master)
            .query_async(&mut conn)
            .await?;
        Ok(reply)
    }

    /// Pick a healthy replica, rotating across connections. Falls back to the
    /// primary when no sentinel reports one.
    async fn resolve_replica(&self) -> BackendResult<String> {
        let master = &self.config.master_name;
        for sentinel in &self.config.addrs {
            match self.ask_replicas(sentinel, master).await {
                Ok(replicas) if !replicas.is_empty() => {
                    let pick = self.next_replica.fetch_add(1, Ordering::Relaxed) % replicas.len();
                    return Ok(replicas[pick].clone());
                }
                Ok(_) => debug!(%sentinel, %master, "sentinel reports no healthy replica"),
                Err(error) => warn!(%sentinel, %error, "sentinel unreachable, trying next"),
            }
        }
        debug!(%master, "no replica available, reading from the primary");
        self.resolve_primary().await
    }

    async fn ask_replicas(&self, sentinel: &str, master: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.open(sentinel, &self.sentinel_info()).await?;
        let reply: Vec<HashMap<String, String>> = redis::cmd("SENTINEL")
            .arg("replicas")
            .arg(master)
            .query_async(&mut conn)
            .await?;
        Ok(healthy_replicas(reply))
    }

    /// Whether a pooled connection must be replaced before reuse.
    fn is_stale(&self, age: Duration, idle: Duration) -> bool {
        let too_old = !self.config.max_conn_age.is_zero() && age >= self.config.max_conn_age;
        let too_idle = !self.config.idle_timeout.is_zero() && idle >= self.config.idle_timeout;
        too_old || too_idle
    }
}

impl managed::Manager for RedisConnectionManager {
    type Type = RedisConnection;
    type Error = BackendError;

    async fn create(&self) -> BackendResult<RedisConnection> {
        let dial_timeout = self.config.dial_timeout;
        let retries = self.config.retries();
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(dial_timeout, self.connect()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(dial_timeout)),
            };
            match result {
                Ok(conn) => return Ok(conn),
                Err(error) if attempt < retries => {
                    let backoff = self.config.retry_backoff(attempt);
                    debug!(%error, attempt, ?backoff, "redis connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn recycle(
        &self,
        conn: &mut RedisConnection,
        metrics: &Metrics,
    ) -> RecycleResult<BackendError> {
        if self.is_stale(metrics.age(), metrics.last_used()) {
            self.stats.record_stale();
            return Err(RecycleError::Message("connection is stale".into()));
        }
        redis::cmd("PING")
            .query_async::<String>(conn)
            .await
            .map_err(|e| RecycleError::Backend(e.into()))?;
        Ok(())
    }
}

/// Build the pool. Connections are created lazily on first use.
pub fn build_pool(
    config: Arc<RedisConfig>,
    security: Option<SecurityContext>,
    stats: Arc<PoolStats>,
    role: Role,
) -> KvResult<RedisPool> {
    config.validate()?;
    let max_size = config.pool_size;
    let wait_timeout = config.pool_timeout;
    let manager = RedisConnectionManager::new(config, security, stats)?.with_role(role);
    Pool::builder(manager)
        .max_size(max_size)
        .wait_timeout(Some(wait_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| KvError::Config(format!("redis: cannot build connection pool: {e}")))
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries have been spent. Only for idempotent commands.
pub async fn retry_idempotent<T, F, Fut>(
    config: &RedisConfig,
    mut attempt: F,
) -> BackendResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let retries = config.retries();
    let mut retry = 0;
    loop {
        match attempt().await {
            Err(error) if retry < retries && error.is_retryable() => {
                let backoff = config.retry_backoff(retry);
                debug!(%error, retry, ?backoff, "redis command failed, retrying");
                tokio::time::sleep(backoff).await;
                retry += 1;
            }
            result => return result,
        }
    }
}

/// Check out a connection, counting hits, misses and timeouts.
pub async fn checkout(pool: &RedisPool, stats: &PoolStats) -> BackendResult<PooledConnection> {
    match pool.get().await {
        Ok(conn) => {
            if managed::Object::metrics(&conn).recycled.is_some() {
                stats.record_hit();
            } else {
                stats.record_miss();
            }
            Ok(conn)
        }
        Err(err) => {
            if matches!(err, managed::PoolError::Timeout(_)) {
                stats.record_timeout();
            }
            Err(err.into())
        }
    }
}

fn cluster_client(
    config: &RedisConfig,
    security: Option<&SecurityContext>,
) -> KvResult<redis::cluster::ClusterClient> {
    let scheme = if security.is_some() { "rediss" } else { "redis" };
    let nodes: Vec<String> = config
        .addrs
        .iter()
        .map(|addr| format!("{scheme}://{addr}"))
        .collect();

    let mut builder = ClusterClientBuilder::new(nodes)
        .retries(config.retries())
        .min_retry_wait(millis(config.min_retry_backoff))
        .max_retry_wait(millis(config.max_retry_backoff))
        .connection_timeout(config.dial_timeout)
        .response_timeout(config.command_timeout());
    if let Some(username) = non_empty(&config.username) {
        builder = builder.username(username);
    }
    if let Some(password) = non_empty(&config.password) {
        builder = builder.password(password);
    }
    if config.replica_reads() {
        builder = builder.read_from_replicas();
    }
    if let Some(security) = security {
        // The cluster client builds its rustls config from the process-wide
        // provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        builder = builder.certs(cluster_certificates(security)?);
    }
    builder
        .build()
        .map_err(|e| KvError::Config(format!("redis: cannot build cluster client: {e}")))
}

/// The cluster client only accepts raw PEM material, read once here.
fn cluster_certificates(security: &SecurityContext) -> Result<redis::TlsCertificates, TlsError> {
    let material = security.material();
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TlsError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => TlsError::Config(format!("cannot read {}: {e}", path.display())),
        })
    };

    let client_tls = if security.has_client_certificate() {
        Some(redis::ClientTlsConfig {
            client_cert: read(&material.cert)?,
            client_key: read(&material.key)?,
        })
    } else {
        None
    };
    let root_cert = if material.root_ca.as_os_str().is_empty() {
        None
    } else {
        Some(read(&material.root_ca)?)
    };
    Ok(redis::TlsCertificates {
        client_tls,
        root_cert,
    })
}

/// Addresses of replicas not flagged down or disconnected.
fn healthy_replicas(reply: Vec<HashMap<String, String>>) -> Vec<String> {
    reply
        .into_iter()
        .filter(|replica| {
            let flags = replica.get("flags").map(String::as_str).unwrap_or_default();
            !flags
                .split(',')
                .any(|flag| matches!(flag, "s_down" | "o_down" | "disconnected"))
        })
        .filter_map(|replica| {
            Some(host_port(replica.get("ip")?, replica.get("port")?))
        })
        .collect()
}

fn host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn server_name(addr: &str) -> io::Result<ServerName<'static>> {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
