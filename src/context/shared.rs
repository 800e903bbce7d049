// src/context/shared.rs

//! Mutex-guarded mapping with a durable shadow copy.
//!
//! Every access refreshes a snapshot held next to the live map. If the
//! mutex is poisoned — a worker panicked while holding it — reads are
//! served from the last good snapshot and writes land on the snapshot so
//! later readers still observe them; both log a warning. Reads return
//! cloned values in all cases.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Debug, Default)]
pub struct SharedMap {
    inner: Mutex<BTreeMap<String, Value>>,
    shadow: RwLock<BTreeMap<String, Value>>,
}

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Mutex::new(map.clone()),
            shadow: RwLock::new(map),
        }
    }

    /// Run `f` against the live map and refresh the shadow; fall back to
    /// the shadow when the live map is poisoned.
    fn with_map<T>(&self, op: &str, f: impl FnOnce(&mut BTreeMap<String, Value>) -> T) -> T {
        match self.inner.lock() {
            Ok(mut guard) => {
                let out = f(&mut guard);
                let mut shadow = self
                    .shadow
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *shadow = guard.clone();
                out
            }
            Err(_poisoned) => {
                warn!(op, "shared map is poisoned; falling back to shadow copy");
                let mut shadow = self
                    .shadow
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                f(&mut shadow)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_map("get", |map| map.get(key).cloned())
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.with_map("insert", |map| {
            map.insert(key.to_string(), value);
        })
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.with_map("remove", |map| map.remove(key))
    }

    pub fn extend<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.with_map("extend", |map| map.extend(entries))
    }

    pub fn keys(&self) -> Vec<String> {
        self.with_map("keys", |map| map.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.with_map("len", |map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.with_map("snapshot", |map| map.clone())
    }

    /// Hex SHA-256 over the canonical JSON serialization of the snapshot.
    ///
    /// `serde_json` maps keep their keys sorted, so serializing the
    /// snapshot is already canonical; the digest lets downstream components
    /// detect meaningful changes cheaply.
    pub fn digest(&self) -> String {
        let snapshot = self.snapshot();
        let serialized =
            serde_json::to_string(&snapshot).unwrap_or_else(|_| String::from("{}"));
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for SharedMap {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}
