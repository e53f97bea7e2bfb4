use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ==================================================
// TTL MARKET CACHE
// ==================================================
//
// Entries are namespaced by loading mode so on-chain, indexer and REST
// sourcing strategies never read each other's stale data. Expiry is
// checked at read time; expired rows stay in the map until an explicit
// sweep. Writers may race on a key; last write wins.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    OnChain,
    Indexer,
    Rest,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::OnChain => "onchain",
            LoadMode::Indexer => "indexer",
            LoadMode::Rest => "rest",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub written_ms: u128,
    pub ttl_ms: u64,
    pub mode: LoadMode,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now_ms: u128) -> bool {
        now_ms >= self.written_ms + self.ttl_ms as u128
    }
}

#[derive(Clone, Default)]
pub struct MarketCache {
    inner: Arc<RwLock<HashMap<(LoadMode, String), CacheEntry>>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, mode: LoadMode, key: &str, value: Value, ttl_ms: u64) {
        let mut map = self.inner.write().await;
        map.insert(
            (mode, key.to_string()),
            CacheEntry {
                value,
                written_ms: now_ms(),
                ttl_ms,
                mode,
            },
        );
    }

    /// Expiry-checked read. An expired entry reads as a miss but is not
    /// removed here.
    pub async fn get(&self, mode: LoadMode, key: &str) -> Option<Value> {
        self.get_at(mode, key, now_ms()).await
    }

    pub(crate) async fn get_at(&self, mode: LoadMode, key: &str, now_ms: u128) -> Option<Value> {
        let map = self.inner.read().await;
        let entry = map.get(&(mode, key.to_string()))?;
        if entry.is_expired_at(now_ms) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn delete(&self, mode: LoadMode, key: &str) -> bool {
        let mut map = self.inner.write().await;
        map.remove(&(mode, key.to_string())).is_some()
    }

    pub async fn keys(&self, mode: LoadMode) -> Vec<String> {
        let map = self.inner.read().await;
        map.keys()
            .filter(|(m, _)| *m == mode)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Remove every expired entry across all modes. Returns the count
    /// removed.
    pub async fn clear_expired(&self) -> usize {
        self.clear_expired_at(now_ms()).await
    }

    pub(crate) async fn clear_expired_at(&self, now_ms: u128) -> usize {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired_at(now_ms));
        before - map.len()
    }

    /// Raw presence check, ignoring expiry. Lets callers observe that an
    /// expired row survives until swept.
    pub async fn contains_unswept(&self, mode: LoadMode, key: &str) -> bool {
        let map = self.inner.read().await;
        map.contains_key(&(mode, key.to_string()))
    }
}

fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis()
}
