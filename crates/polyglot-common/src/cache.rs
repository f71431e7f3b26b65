//! TTL caches for intermediate artifacts.
//!
//! Thin wrapper over mini-moka-wasm's thread-safe cache, plus a content key
//! helper so callers can cache by input instead of by identity.

use std::time::Duration;

use smol_str::SmolStr;

pub type Cache<K, V> = mini_moka_wasm::sync::Cache<K, V>;

pub fn new_cache<K, V>(max_capacity: u64, ttl: Duration) -> Cache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    mini_moka_wasm::sync::Cache::builder()
        .max_capacity(max_capacity)
        .time_to_live(ttl)
        .build()
}

pub fn get<K, V>(cache: &Cache<K, V>, key: &K) -> Option<V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache.get(key)
}

pub fn insert<K, V>(cache: &Cache<K, V>, key: K, value: V)
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache.insert(key, value);
}

pub fn clear<K, V>(cache: &Cache<K, V>)
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache.invalidate_all();
}

/// Stable key over a sequence of inputs.
///
/// Each part is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
pub fn content_key<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> SmolStr {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    SmolStr::new(hasher.finalize().to_hex().as_str())
}
