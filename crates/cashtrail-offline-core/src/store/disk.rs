use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheStorage, CachedResponse};
use crate::error::CacheError;
use crate::http::{CacheKey, Response};

/// Extension of store files inside the cache directory
const STORE_EXTENSION: &str = "json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    name: String,
    entries: BTreeMap<CacheKey, CachedResponse>,
}

/// Cache storage persisted as one JSON file per named store.
///
/// The store name is recoverable from the file name alone, so stores whose
/// contents no longer parse can still be listed and deleted. Files are
/// replaced through a rename so a crash mid-write leaves the previous
/// contents intact.
pub struct DiskCacheStorage {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles on the store files
    lock: Mutex<()>,
}

/// Encode a store name as a file stem. ASCII letters, digits, `-` and `.`
/// are kept; every other byte becomes `_XX` (hex), so the mapping is
/// reversible and distinct names never share a file.
fn encode_name(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

fn decode_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut name = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = stem.get(i + 1..i + 3)?;
            name.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            name.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(name).ok()
}

impl DiskCacheStorage {
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            lock: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", encode_name(name), STORE_EXTENSION))
    }

    async fn load(&self, name: &str) -> Result<Option<StoreFile>, CacheError> {
        let path = self.store_path(name);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: StoreFile = serde_json::from_str(&contents)?;
        if file.name != name {
            return Err(CacheError::Corrupt(format!(
                "{} holds store '{}', expected '{}'",
                path.display(),
                file.name,
                name
            )));
        }
        Ok(Some(file))
    }

    async fn save(&self, file: &StoreFile) -> Result<(), CacheError> {
        let path = self.store_path(&file.name);
        let tmp = path.with_extension("tmp");
        let contents = serde_json::to_string(file)?;
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        debug!(cache = %file.name, entries = file.entries.len(), "Saved cache store");
        Ok(())
    }

    async fn upsert(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<(), CacheError> {
        let existing = match self.load(name).await {
            Ok(file) => file,
            Err(CacheError::Io(e)) => return Err(CacheError::Io(e)),
            Err(e) => {
                // Unreadable contents would otherwise block every later write
                warn!(cache = %name, error = %e, "Discarding corrupt cache store");
                None
            }
        };
        let mut file = existing.unwrap_or_else(|| StoreFile {
            name: name.to_string(),
            entries: BTreeMap::new(),
        });
        for (key, response) in entries {
            file.entries.insert(key, CachedResponse::new(response));
        }
        self.save(&file).await
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let _guard = self.lock.lock().await;
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_name(stem) {
                Some(name) => names.push(name),
                None => debug!(path = %path.display(), "Skipping file with foreign name"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.load(name).await?.and_then(|mut file| file.entries.remove(key)))
    }

    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        self.upsert(name, vec![(key, response)]).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        self.upsert(name, entries).await
    }

    /// Removes the store file without reading it, so corrupt stores go too.
    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let _guard = self.lock.lock().await;
        match fs::remove_file(self.store_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self, name: &str) -> Result<Vec<(CacheKey, CachedResponse)>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load(name)
            .await?
            .map(|file| file.entries.into_iter().collect())
            .unwrap_or_default())
    }
}
