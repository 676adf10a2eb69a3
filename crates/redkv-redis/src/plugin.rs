//! Host-facing plugin: hands out drivers built from configuration sections.

use std::sync::{Arc, Mutex, PoisonError};

use redkv_core::{Configurer, KvError, KvResult};

use crate::driver::RedisDriver;
use crate::metrics::PoolCollector;

pub const PLUGIN_NAME: &str = "redis";

/// Creates [`RedisDriver`]s and keeps their pool collectors for export.
pub struct RedisPlugin {
    configurer: Arc<dyn Configurer>,
    collectors: Mutex<Vec<PoolCollector>>,
}

impl RedisPlugin {
    pub fn init(configurer: Arc<dyn Configurer>) -> Self {
        Self {
            configurer,
            collectors: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    /// Driver for the section at `key`, falling back to the global `redis`
    /// section when `key` is absent.
    pub fn kv_from_config(&self, key: &str) -> KvResult<RedisDriver> {
        let section = if self.configurer.has(key) {
            key
        } else if self.configurer.has(PLUGIN_NAME) {
            tracing::debug!(key, "section not found, using global redis section");
            PLUGIN_NAME
        } else {
            return Err(KvError::Config(format!(
                "no configuration found at '{key}' or '{PLUGIN_NAME}'"
            )));
        };

        let driver = RedisDriver::from_configurer(section, self.configurer.as_ref())?;
        if let Some(collector) = driver.metrics_collector() {
            self.collectors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(collector);
        }
        Ok(driver)
    }

    /// Pool collectors of every driver handed out so far.
    pub fn metrics_collectors(&self) -> Vec<PoolCollector> {
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
