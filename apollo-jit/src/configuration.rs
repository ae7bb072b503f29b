//! Compiler configuration.
//!
//! Read from YAML, for example:
//!
//! ```yaml
//! cache:
//!   in_memory:
//!     limit: 1000
//!     ttl: 10m
//! execution:
//!   timeout: 30s
//! ```

use std::time::Duration;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::error::CacheConfigError;

const DEFAULT_CACHE_LIMIT: usize = 512;

fn default_cache_limit() -> usize {
    DEFAULT_CACHE_LIMIT
}

fn default_enabled() -> bool {
    true
}

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    Deserialize(serde_yaml::Error),

    /// invalid 'cache.in_memory' configuration: {0}
    Cache(CacheConfigError),
}

/// The compiler configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Compiled plan caching
    pub cache: Cache,

    /// Plan execution
    pub execution: Execution,
}

impl Configuration {
    /// Parse and validate a YAML configuration. An empty document yields the defaults.
    pub fn from_yaml(raw_yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = if raw_yaml.trim().is_empty() {
            Configuration::default()
        } else {
            serde_yaml::from_str(raw_yaml).map_err(ConfigurationError::Deserialize)?
        };
        configuration.validate()?;
        Ok(configuration)
    }

    /// Check the values serde cannot check by itself.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.cache
            .in_memory
            .validate()
            .map_err(ConfigurationError::Cache)
    }

    /// The JSON schema of the configuration file.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(Configuration)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Cache {
    /// In memory LRU cache of compiled plans
    pub in_memory: InMemoryCache,
}

/// In memory cache configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct InMemoryCache {
    /// Whether compiled plans are cached at all; defaults to true
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of cached plans; defaults to 512
    #[serde(default = "default_cache_limit")]
    #[schemars(default = "default_cache_limit")]
    pub limit: usize,

    /// Time to live of a cached plan in human-readable format (eg. `10m`); plans never expire
    /// by default
    #[serde(with = "humantime_serde", default)]
    #[schemars(with = "Option<String>", default)]
    pub ttl: Option<Duration>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: DEFAULT_CACHE_LIMIT,
            ttl: None,
        }
    }
}

#[buildstructor::buildstructor]
impl InMemoryCache {
    /// Builder with the same defaults as the YAML configuration.
    #[builder(visibility = "pub")]
    fn new(enabled: Option<bool>, limit: Option<usize>, ttl: Option<Duration>) -> Self {
        Self {
            enabled: enabled.unwrap_or_else(default_enabled),
            limit: limit.unwrap_or_else(default_cache_limit),
            ttl,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CacheConfigError> {
        if self.limit == 0 {
            return Err(CacheConfigError::ZeroCapacity);
        }
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheConfigError::ZeroTtl);
        }
        Ok(())
    }
}

/// Execution configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Execution {
    /// Maximum duration of one execution in human-readable format (eg. `30s`); a request may
    /// override it. Unbounded by default
    #[serde(with = "humantime_serde", default)]
    #[schemars(with = "Option<String>", default)]
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let configuration = Configuration::from_yaml("").unwrap();
        assert_eq!(configuration, Configuration::default());
        assert_eq!(configuration.cache.in_memory.limit, 512);
        assert!(configuration.cache.in_memory.enabled);
        assert_eq!(configuration.execution.timeout, None);
    }

    #[test]
    fn parses_human_readable_durations() {
        let configuration = Configuration::from_yaml(
            r#"
cache:
  in_memory:
    limit: 10
    ttl: 10m
execution:
  timeout: 1s 500ms
"#,
        )
        .unwrap();
        assert_eq!(configuration.cache.in_memory.limit, 10);
        assert_eq!(
            configuration.cache.in_memory.ttl,
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            configuration.execution.timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = Configuration::from_yaml("cache:\n  redis: {}\n").unwrap_err();
        assert!(matches!(error, ConfigurationError::Deserialize(_)));
    }

    #[test]
    fn rejects_zero_limit() {
        let error = Configuration::from_yaml("cache:\n  in_memory:\n    limit: 0\n").unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid 'cache.in_memory' configuration: cache capacity must be greater than zero"
        );
    }

    #[test]
    fn builder_defaults() {
        let cache = InMemoryCache::builder().limit(3).build();
        assert_eq!(cache.limit, 3);
        assert!(cache.enabled);
        assert_eq!(cache.ttl, None);
    }

    #[test]
    fn schema_lists_every_section() {
        let schema = serde_json::to_value(Configuration::json_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("cache"));
        assert!(properties.contains_key("execution"));
    }
}
