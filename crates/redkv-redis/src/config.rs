//! Redis driver configuration
//!
//! [`RedisConfig`] is decoded from the host configuration section. Zero
//! values mean "use the default"; [`RedisConfig::init_defaults`] fills them
//! in before [`RedisConfig::validate`] runs. Durations are humantime strings
//! such as `"5s"` or `"250ms"`.

use std::path::PathBuf;
use std::time::Duration;

use redkv_core::{KvError, KvResult};
use serde::{Deserialize, Serialize};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MIN_RETRY_BACKOFF: Duration = Duration::from_millis(8);
const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_millis(512);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_RETRIES: i32 = 3;
const POOL_SIZE_PER_CPU: usize = 10;

/// How the address list is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// One address, one server.
    Single,
    /// `addrs` are sentinels; the primary is looked up by `master_name`.
    Sentinel,
    /// `addrs` are cluster seed nodes.
    Cluster,
}

/// TLS material paths. All empty disables TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Client certificate chain (PEM).
    pub cert: PathBuf,
    /// Client private key (PEM).
    pub key: PathBuf,
    /// Additional trusted root certificates (PEM).
    pub root_ca: PathBuf,
}

impl TlsConfig {
    pub fn is_empty(&self) -> bool {
        self.cert.as_os_str().is_empty()
            && self.key.as_os_str().is_empty()
            && self.root_ca.as_os_str().is_empty()
    }
}

/// Redis connection, pool and routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub addrs: Vec<String>,
    pub db: i64,
    pub username: String,
    pub password: String,
    pub sentinel_password: String,
    pub master_name: String,

    /// Negative disables retries, zero means the default of 3.
    pub max_retries: i32,
    #[serde(with = "humantime_duration")]
    pub min_retry_backoff: Duration,
    #[serde(with = "humantime_duration")]
    pub max_retry_backoff: Duration,

    #[serde(with = "humantime_duration")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub write_timeout: Duration,

    pub pool_size: usize,
    pub min_idle_conns: usize,
    /// Zero keeps connections regardless of age.
    #[serde(with = "humantime_duration")]
    pub max_conn_age: Duration,
    #[serde(with = "humantime_duration")]
    pub pool_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub idle_timeout: Duration,

    pub read_only: bool,
    pub route_by_latency: bool,
    pub route_randomly: bool,

    pub tls: Option<TlsConfig>,
}

impl RedisConfig {
    /// Config for a single node.
    pub fn standalone(addr: impl Into<String>) -> Self {
        Self {
            addrs: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Config for a cluster seeded by `nodes`.
    pub fn cluster(nodes: Vec<String>) -> Self {
        Self {
            addrs: nodes,
            ..Default::default()
        }
    }

    /// Config for a sentinel-managed primary.
    pub fn sentinel(sentinels: Vec<String>, master_name: impl Into<String>) -> Self {
        Self {
            addrs: sentinels,
            master_name: master_name.into(),
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Replace zero values with defaults.
    pub fn init_defaults(&mut self) {
        if self.addrs.is_empty() {
            self.addrs = vec![DEFAULT_ADDR.to_string()];
        }
        if self.pool_size == 0 {
            let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
            self.pool_size = POOL_SIZE_PER_CPU * cpus;
        }
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.min_retry_backoff.is_zero() {
            self.min_retry_backoff = DEFAULT_MIN_RETRY_BACKOFF;
        }
        if self.max_retry_backoff.is_zero() {
            self.max_retry_backoff = DEFAULT_MAX_RETRY_BACKOFF;
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if self.read_timeout.is_zero() {
            self.read_timeout = DEFAULT_READ_TIMEOUT;
        }
        if self.write_timeout.is_zero() {
            self.write_timeout = self.read_timeout;
        }
        if self.pool_timeout.is_zero() {
            self.pool_timeout = self.read_timeout + Duration::from_secs(1);
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = DEFAULT_IDLE_TIMEOUT;
        }
    }

    /// Check the configuration is usable. Call after [`init_defaults`](Self::init_defaults).
    pub fn validate(&self) -> KvResult<()> {
        if self.addrs.is_empty() {
            return Err(KvError::Config("redis: addrs cannot be empty".into()));
        }
        if let Some(addr) = self.addrs.iter().find(|a| a.rsplit_once(':').is_none()) {
            return Err(KvError::Config(format!(
                "redis: address '{addr}' must be host:port"
            )));
        }
        if self.pool_size == 0 {
            return Err(KvError::Config("redis: pool_size cannot be zero".into()));
        }
        if self.min_idle_conns > self.pool_size {
            return Err(KvError::Config(format!(
                "redis: min_idle_conns ({}) exceeds pool_size ({})",
                self.min_idle_conns, self.pool_size
            )));
        }
        if self.min_retry_backoff > self.max_retry_backoff {
            return Err(KvError::Config(
                "redis: min_retry_backoff exceeds max_retry_backoff".into(),
            ));
        }
        if self.db < 0 {
            return Err(KvError::Config("redis: db cannot be negative".into()));
        }
        if self.deployment() == Deployment::Cluster && self.db != 0 {
            return Err(KvError::Config(
                "redis: cluster deployments only support db 0".into(),
            ));
        }
        Ok(())
    }

    pub fn deployment(&self) -> Deployment {
        if !self.master_name.is_empty() {
            Deployment::Sentinel
        } else if self.addrs.len() > 1 {
            Deployment::Cluster
        } else {
            Deployment::Single
        }
    }

    /// Number of connection attempts after the first one.
    pub fn retries(&self) -> u32 {
        u32::try_from(self.max_retries).unwrap_or(0)
    }

    /// Upper bound for a single command round trip.
    pub fn command_timeout(&self) -> Duration {
        self.read_timeout + self.write_timeout
    }

    /// Whether reads may go to replicas. Cluster and sentinel deployments
    /// honor it; a single node has none.
    pub fn replica_reads(&self) -> bool {
        self.read_only || self.route_by_latency || self.route_randomly
    }

    /// Backoff before retry number `attempt` (0-based), clamped to the
    /// configured bounds. Inverted bounds are swapped.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let floor = self.min_retry_backoff.min(self.max_retry_backoff);
        let ceiling = self.min_retry_backoff.max(self.max_retry_backoff);
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        floor.saturating_mul(factor).clamp(floor, ceiling)
    }
}

/// Serde adapter for humantime duration strings.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" {
            return Ok(Duration::ZERO);
        }
        humantime::parse_duration(raw).map_err(de::Error::custom)
    }
}
