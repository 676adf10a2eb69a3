//! # redkv
//!
//! redkv exposes a Redis deployment (single node, sentinel-managed primary
//! or cluster) through one small key-value contract.
//!
//! ## Core Components
//!
//! - **[Storage]**: the operation set: `has`, `get`, `mget`, `set`,
//!   `mexpire`, `ttl`, `delete`, `clear` and `stop`
//! - **[Item]**: a key, an opaque value and an optional RFC3339 deadline
//! - **[RedisDriver]**: the pooled Redis implementation of [Storage]
//! - **[RedisPlugin]**: hands out drivers built from configuration sections
//! - **[tls]**: the rustls context with hardware-aware cipher ordering and
//!   per-handshake client certificate reload
//!
//! ## Quick Start
//!
//! ```rust
//! use redkv::{Item, MemoryBackend, RedisDriver, Storage};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> redkv::KvResult<()> {
//! let driver = RedisDriver::with_backend(MemoryBackend::new());
//! driver.set(&[Item::new("greeting", "hello")]).await?;
//! assert_eq!(driver.get("greeting").await?, b"hello");
//! # Ok(())
//! # }
//! ```

pub use redkv_core::{
    Configurer, Item, KvError, KvResult, Op, Storage, TlsError, YamlConfigurer, unmarshal_key,
};
pub use redkv_redis::{
    BackendError, CertificateSupplier, Deployment, FileCertificateSupplier, KeyTtl, KvBackend,
    MemoryBackend, PLUGIN_NAME, PoolCollector, RedisBackend, RedisConfig, RedisDriver,
    RedisPlugin, SecurityContext, TlsConfig, build_security_context,
};

pub use redkv_core::{ttl, validate};
pub use redkv_redis::{metrics, tls};
