//! Injected key-value cache capability.
//!
//! The core never reaches for ambient storage; everything that wants
//! caching receives a `ContentCache` handle. Payloads are JSON values so
//! a host can back this with localStorage-style stores, Redis, or the
//! bundled in-memory map.

pub mod keys;

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

pub trait ContentCache: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);
}

/// Typed convenience layer over the value-based trait.
pub trait ContentCacheExt {
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T>;
    fn set_typed<T: Serialize>(&self, key: &str, value: &T);
}

impl<C: ContentCache + ?Sized> ContentCacheExt for C {
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(key, error = %err, "discarding cached payload with stale shape");
                None
            }
        }
    }

    fn set_typed<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, json),
            Err(err) => warn!(key, error = %err, "failed to serialize cache payload"),
        }
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ContentCache for MemoryCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.entries.lock().insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_typed_payloads() {
        let cache = MemoryCache::new();
        cache.set_typed("answer", &vec![1, 2, 3]);
        let restored: Option<Vec<i32>> = cache.get_typed("answer");
        assert_eq!(restored, Some(vec![1, 2, 3]));
    }

    #[test]
    fn stale_shape_reads_as_miss() {
        let cache = MemoryCache::new();
        cache.set("answer", serde_json::json!({"not": "a list"}));
        let restored: Option<Vec<i32>> = cache.get_typed("answer");
        assert!(restored.is_none());
    }
}
