//! Per-request context made available to resolvers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json_bytes::Value;

/// Holds JSON values under string keys for the duration of one request.
///
/// Cloning a context is cheap: clones share the same entries, so values inserted by one
/// resolver are visible to every resolver that runs after it.
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: Arc<DashMap<String, Value>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value from the context using the provided key.
    ///
    /// Returns `Ok(None)` if the key is absent and an error if the stored value cannot be
    /// deserialized as `V`.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, serde_json::Error>
    where
        K: AsRef<str>,
        V: DeserializeOwned,
    {
        self.entries
            .get(key.as_ref())
            .map(|v| serde_json_bytes::from_value(v.value().clone()))
            .transpose()
    }

    /// Insert a value, returning the previous one if any.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<Value>, serde_json::Error>
    where
        K: Into<String>,
        V: Serialize,
    {
        let value = serde_json_bytes::to_value(value)?;
        Ok(self.entries.insert(key.into(), value))
    }

    /// Whether a value is stored under `key`.
    pub fn contains_key<K>(&self, key: K) -> bool
    where
        K: AsRef<str>,
    {
        self.entries.contains_key(key.as_ref())
    }

    /// Remove and return the value stored under `key`.
    pub fn remove<K>(&self, key: K) -> Option<Value>
    where
        K: AsRef<str>,
    {
        self.entries.remove(key.as_ref()).map(|(_, v)| v)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the context is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let context = Context::new();
        assert_eq!(context.insert("user_id", 42).unwrap(), None);
        assert_eq!(context.get::<_, u32>("user_id").unwrap(), Some(42));
        assert_eq!(context.get::<_, u32>("missing").unwrap(), None);
        assert!(context.get::<_, String>("user_id").is_err());
    }

    #[test]
    fn clones_share_entries() {
        let context = Context::new();
        let clone = context.clone();
        clone.insert("seen", true).unwrap();
        assert!(context.contains_key("seen"));
        assert_eq!(context.remove("seen"), Some(Value::Bool(true)));
        assert!(clone.is_empty());
    }
}
