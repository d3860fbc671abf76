//! Durable key-value backing for agent actors and the gateway.
//!
//! Each actor owns one namespace; the gateway owns a shared namespace for
//! the record and registry tables. Values are raw `serde_json::Value`s so
//! callers keep full control of their wire shapes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use sg_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kv trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A durable string-keyed JSON store. Implementations must be cheap to
/// clone a handle to and safe to share across tasks.
pub trait Kv: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<bool>;
    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn list_prefix(&self, prefix: &str) -> Vec<(String, Value)>;
}

/// Typed convenience layer over the raw JSON contract.
pub trait KvExt: Kv {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, serde_json::to_value(value)?)
    }
}

impl<K: Kv + ?Sized> KvExt for K {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryKv
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Purely in-memory store. Used by tests and by ephemeral namespaces
/// (the relay subscriber set needs no durability).
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        self.map.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn list_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        self.map
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FileKv
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON file per namespace, loaded leniently at open and written
/// through on every mutation. Corrupt files start the namespace empty
/// rather than refusing to boot.
pub struct FileKv {
    path: PathBuf,
    map: RwLock<BTreeMap<String, Value>>,
}

impl FileKv {
    /// Open (or create) the namespace file at `dir/<name>.json`.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let path = dir.join(format!("{name}.json"));

        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        tracing::debug!(
            keys = map.len(),
            path = %path.display(),
            "kv namespace loaded"
        );

        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    fn flush_locked(&self, map: &BTreeMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string(map)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }

    /// Persist the current state. Mutations already write through; this
    /// exists for shutdown paths that want an explicit final write.
    pub fn flush(&self) -> Result<()> {
        self.flush_locked(&self.map.read())
    }
}

impl Kv for FileKv {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self.map.write();
        map.insert(key.to_owned(), value);
        self.flush_locked(&map)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.write();
        let removed = map.remove(key).is_some();
        if removed {
            self.flush_locked(&map)?;
        }
        Ok(removed)
    }

    fn list_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        self.map
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_kv_round_trip_and_prefix() {
        let kv = MemoryKv::new();
        kv.put("record:a", json!({"n": 1})).unwrap();
        kv.put("record:b", json!({"n": 2})).unwrap();
        kv.put("shared:a", json!({"n": 3})).unwrap();

        assert_eq!(kv.get("record:a").unwrap()["n"], 1);
        let records = kv.list_prefix("record:");
        assert_eq!(records.len(), 2);
        assert!(kv.delete("record:a").unwrap());
        assert!(!kv.delete("record:a").unwrap());
    }

    #[test]
    fn file_kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = FileKv::open(dir.path(), "agent-alice").unwrap();
            kv.put("loopCount", json!(7)).unwrap();
            kv.put("alarmMode", json!("think")).unwrap();
        }
        let kv = FileKv::open(dir.path(), "agent-alice").unwrap();
        assert_eq!(kv.get("loopCount").unwrap(), json!(7));
        assert_eq!(kv.get("alarmMode").unwrap(), json!("think"));
    }

    #[test]
    fn file_kv_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let kv = FileKv::open(dir.path(), "broken").unwrap();
        assert!(kv.get("anything").is_none());
    }

    #[test]
    fn typed_accessors() {
        let kv = MemoryKv::new();
        kv.put_as("streak", &3u32).unwrap();
        assert_eq!(kv.get_as::<u32>("streak"), Some(3));
    }
}
