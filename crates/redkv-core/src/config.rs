//! Access to the host's decoded configuration.
//!
//! Drivers never parse configuration files themselves. The host hands them
//! a [`Configurer`] and a section key; [`unmarshal_key`] turns that section
//! into a typed record.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::error::{KvError, KvResult};

/// Read-only view over a configuration tree. Keys are dot-separated paths.
pub trait Configurer: Send + Sync {
    /// Whether a section exists at `key`.
    fn has(&self, key: &str) -> bool {
        self.section(key).is_some()
    }

    /// Raw section at `key`.
    fn section(&self, key: &str) -> Option<Value>;
}

/// Decode the section at `key` into `T`.
pub fn unmarshal_key<T: DeserializeOwned>(configurer: &dyn Configurer, key: &str) -> KvResult<T> {
    let section = configurer
        .section(key)
        .ok_or_else(|| KvError::Config(format!("section '{key}' not found")))?;
    serde_yaml::from_value(section)
        .map_err(|e| KvError::Config(format!("section '{key}' is malformed: {e}")))
}

/// [`Configurer`] backed by a YAML document.
#[derive(Debug, Clone, Default)]
pub struct YamlConfigurer {
    root: Value,
}

impl YamlConfigurer {
    pub fn from_yaml(source: &str) -> KvResult<Self> {
        let root = serde_yaml::from_str(source)
            .map_err(|e| KvError::Config(format!("invalid YAML: {e}")))?;
        Ok(Self { root })
    }

    pub fn from_file(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| KvError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&source)
    }
}

impl Configurer for YamlConfigurer {
    fn section(&self, key: &str) -> Option<Value> {
        let mut node = &self.root;
        for part in key.split('.').filter(|p| !p.is_empty()) {
            node = node.as_mapping()?.get(part)?;
        }
        if node.is_null() {
            return None;
        }
        Some(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const DOC: &str = r#"
redis:
  addrs: ["10.0.0.1:6379"]
kv:
  sessions:
    driver: redis
    config:
      db: 3
  empty:
"#;

    #[derive(Debug, Deserialize)]
    struct Sessions {
        driver: String,
        config: Inner,
    }

    #[derive(Debug, Deserialize)]
    struct Inner {
        db: i64,
    }

    #[test]
    fn nested_section_is_decoded() {
        let cfg = YamlConfigurer::from_yaml(DOC).unwrap();
        let sessions: Sessions = unmarshal_key(&cfg, "kv.sessions").unwrap();
        assert_eq!(sessions.driver, "redis");
        assert_eq!(sessions.config.db, 3);
    }

    #[test]
    fn missing_and_null_sections_are_absent() {
        let cfg = YamlConfigurer::from_yaml(DOC).unwrap();
        assert!(cfg.has("redis"));
        assert!(!cfg.has("kv.cache"));
        assert!(!cfg.has("kv.empty"));
        assert!(!cfg.has("redis.addrs.0"));
    }

    #[test]
    fn missing_section_is_a_config_error() {
        let cfg = YamlConfigurer::from_yaml(DOC).unwrap();
        let err = unmarshal_key::<Sessions>(&cfg, "kv.cache").unwrap_err();
        assert!(matches!(err, KvError::Config(ref msg) if msg.contains("kv.cache")));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        assert!(YamlConfigurer::from_yaml("redis: [unclosed").is_err());
    }
}
