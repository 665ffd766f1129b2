//! Named cache stores holding request/response pairs.
//!
//! A `CacheStorage` owns any number of named stores. The worker only ever
//! reads from and writes to the store named by its current cache version;
//! the other names are leftovers that activation deletes.
//!
//! Two implementations are provided:
//! - `MemoryCacheStorage`: process-local, used by tests and short-lived hosts
//! - `DiskCacheStorage`: one JSON file per store under a cache directory

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::http::{CacheKey, Response};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Store operations the worker needs from its host.
///
/// Puts are last-writer-wins per key. `put_all` is all-or-nothing: either
/// every entry lands or none does.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every existing store, sorted.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.keys().await?.iter().any(|n| n == name))
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError>;

    /// Store one entry, creating the store if needed.
    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<(), CacheError>;

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<(), CacheError>;

    /// Drop a whole store. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    async fn entries(&self, name: &str) -> Result<Vec<(CacheKey, CachedResponse)>, CacheError>;
}

/// A stored response and the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}
