//! # redkv core
//!
//! The contract shared by redkv storage drivers: the [`Storage`] trait, the
//! [`Item`] write unit, the error taxonomy, input validation and the
//! deadline/duration conversions used for expiries.

pub mod config;
pub mod error;
pub mod item;
pub mod storage;
pub mod ttl;
pub mod validate;

pub use config::{Configurer, YamlConfigurer, unmarshal_key};
pub use error::{BoxError, KvError, KvResult, Op, TlsError};
pub use item::Item;
pub use storage::Storage;
