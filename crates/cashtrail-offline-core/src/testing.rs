//! Scripted collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::error::{CacheError, NetworkError};
use crate::http::{CacheKey, Request, Response};
use crate::network::Network;
use crate::store::{CacheStorage, CachedResponse, MemoryCacheStorage};

/// Network answering from a route table. Unknown URLs get a 404.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: Url, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    /// Make a single URL fail at the transport level.
    pub fn fail(&self, url: Url) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
            return Err(NetworkError::Offline(url));
        }
        let response = self.routes.lock().unwrap().get(&url).cloned();
        Ok(response.unwrap_or_else(|| Response::new(404, "Not Found")))
    }
}

/// Memory storage that counts calls and can be told to fail.
pub struct ObservedStorage {
    inner: MemoryCacheStorage,
    operations: AtomicUsize,
    failing_deletes: Mutex<HashSet<String>>,
    failing_keys: AtomicBool,
}

impl ObservedStorage {
    pub fn new(inner: MemoryCacheStorage) -> Self {
        Self {
            inner,
            operations: AtomicUsize::new(0),
            failing_deletes: Mutex::new(HashSet::new()),
            failing_keys: AtomicBool::new(false),
        }
    }

    /// The wrapped storage, for seeding without counting.
    pub fn inner(&self) -> &MemoryCacheStorage {
        &self.inner
    }

    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn fail_delete(&self, name: &str) {
        self.failing_deletes.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_keys(&self) {
        self.failing_keys.store(true, Ordering::SeqCst);
    }

    fn count(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for ObservedStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.count();
        if self.failing_keys.load(Ordering::SeqCst) {
            return Err(CacheError::Corrupt("store listing unavailable".to_string()));
        }
        self.inner.keys().await
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        self.count();
        self.inner.match_in(name, key).await
    }

    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<(), CacheError> {
        self.count();
        self.inner.put(name, key, response).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<(), CacheError> {
        self.count();
        self.inner.put_all(name, entries).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.count();
        if self.failing_deletes.lock().unwrap().contains(name) {
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot delete {}", name),
            )));
        }
        self.inner.delete(name).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<(CacheKey, CachedResponse)>, CacheError> {
        self.count();
        self.inner.entries(name).await
    }
}
