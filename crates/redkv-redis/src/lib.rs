//! # redkv Redis driver
//!
//! [`RedisDriver`] implements [`redkv_core::Storage`] on top of a pooled
//! Redis client. It supports single nodes, sentinel-managed primaries and
//! clusters, speaks TLS through a hardened rustls context ([`tls`]) and
//! reports pool health through a Prometheus collector ([`metrics`]).
//!
//! ```no_run
//! use redkv_core::{Item, Storage};
//! use redkv_redis::{RedisConfig, RedisDriver};
//!
//! # async fn demo() -> redkv_core::KvResult<()> {
//! let driver = RedisDriver::new(RedisConfig::standalone("127.0.0.1:6379"))?;
//! driver.set(&[Item::new("greeting", "hello")]).await?;
//! let value = driver.get("greeting").await?;
//! assert_eq!(value, b"hello");
//! driver.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod pool;
pub mod tls;

pub use backend::{KeyTtl, KvBackend, MemoryBackend, RedisBackend};
pub use config::{Deployment, RedisConfig, TlsConfig};
pub use driver::RedisDriver;
pub use error::{BackendError, BackendResult};
pub use metrics::PoolCollector;
pub use plugin::{PLUGIN_NAME, RedisPlugin};
pub use tls::{CertificateSupplier, FileCertificateSupplier, SecurityContext, build_security_context};
