//! # Connection configuration
//!
//! A minimal string key/value store attached to every `Connection`,
//! mirroring `conn.set()` / `conn.get()`. Plugins read their settings
//! from a snapshot so they never hold the connection lock.
//!
//! ```rust
//! use dog_odm::Connection;
//! let conn = Connection::new();
//!
//! conn.set("tenant.key", "org");
//! conn.set("tenant.required", "true");
//!
//! let cfg = conn.config_snapshot();
//! assert_eq!(cfg.get("tenant.key"), Some("org"));
//! assert_eq!(cfg.get_bool("tenant.required"), Some(true));
//! ```
//!
//! Environment overrides are left to the application:
//!
//! ```rust
//! use dog_odm::Connection;
//! pub fn load_env_config(conn: &Connection, prefix: &str) {
//!     for (key, value) in std::env::vars() {
//!         if let Some(stripped) = key.strip_prefix(prefix) {
//!             // DOG__TENANT__KEY → tenant.key
//!             conn.set(stripped.to_lowercase().replace("__", "."), value);
//!         }
//!     }
//! }
//! ```

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct DogConfig {
    values: HashMap<String, String>,
}

impl DogConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Returns None if the key is not present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn snapshot(&self) -> DogConfigSnapshot {
        DogConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DogConfigSnapshot {
    map: HashMap<String, String>,
}

impl DogConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    /// Build a snapshot directly from pairs (handy in tests).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_typed_getters() {
        let mut cfg = DogConfig::new();
        cfg.set("a", "10");
        cfg.set("b", "true");
        cfg.set("c", "nope");

        let snap = cfg.snapshot();
        assert_eq!(snap.get_usize("a"), Some(10));
        assert_eq!(snap.get_bool("b"), Some(true));
        assert_eq!(snap.get_bool("c"), None);
        assert!(cfg.has("c"));
        assert!(!cfg.has("d"));
    }
}
