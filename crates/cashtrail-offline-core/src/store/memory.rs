use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStorage, CachedResponse};
use crate::error::CacheError;
use crate::http::{CacheKey, Response};

type Store = HashMap<CacheKey, CachedResponse>;

/// In-process cache storage. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    stores: RwLock<BTreeMap<String, Store>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.stores.read().await.keys().cloned().collect())
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        let stores = self.stores.read().await;
        Ok(stores.get(name).and_then(|store| store.get(key)).cloned())
    }

    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<(), CacheError> {
        let mut stores = self.stores.write().await;
        stores
            .entry(name.to_string())
            .or_default()
            .insert(key, CachedResponse::new(response));
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<(), CacheError> {
        // Single write lock: readers see all of the batch or none of it
        let mut stores = self.stores.write().await;
        let store = stores.entry(name.to_string()).or_default();
        for (key, response) in entries {
            store.insert(key, CachedResponse::new(response));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.stores.write().await.remove(name).is_some())
    }

    async fn entries(&self, name: &str) -> Result<Vec<(CacheKey, CachedResponse)>, CacheError> {
        let stores = self.stores.read().await;
        let mut entries: Vec<_> = stores
            .get(name)
            .map(|store| store.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
