//! Worker configuration.
//!
//! A `WorkerConfig` names the current cache version, the origin the worker
//! serves, the static asset manifest and the fetch policy. It is immutable
//! once handed to the worker.
//!
//! Configuration is stored at `~/.config/cashtrail-offline/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::WorkerError;
use crate::http::{Destination, Request};
use crate::network::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::policy::{FetchPolicy, PolicyTable, Strategy};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "cashtrail-offline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Current cache generation. Bump it whenever the precached assets change.
pub const DEFAULT_CACHE_NAME: &str = "cashtrail-v1";

/// Path prefix of the GitHub Pages deployment
pub const CASHTRAIL_BASE_PATH: &str = "/CashTrail";

/// Assets precached at install, relative to the base path.
const CASHTRAIL_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/icon-72x72.png",
    "/icon-96x96.png",
    "/icon-128x128.png",
    "/icon-144x144.png",
    "/icon-152x152.png",
    "/icon-192x192.png",
    "/icon-384x384.png",
    "/icon-512x512.png",
];

fn default_cache_name() -> String {
    DEFAULT_CACHE_NAME.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    pub origin: Url,
    #[serde(default)]
    pub base_path: String,
    /// Paths to precache. Defaults to the CashTrail shell under `base_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_assets: Option<Vec<String>>,
    /// Page served to offline navigations under cache-first.
    /// Defaults to `{base_path}/index.html`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_fallback: Option<String>,
    #[serde(default)]
    pub policy: FetchPolicy,
    /// Per-destination strategies layered over `policy`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<Destination, Strategy>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn new(origin: Url, base_path: &str, policy: FetchPolicy) -> Self {
        Self {
            cache_name: default_cache_name(),
            origin,
            base_path: base_path.trim_end_matches('/').to_string(),
            static_assets: None,
            offline_fallback: None,
            policy,
            overrides: BTreeMap::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// GitHub Pages deployment: `/CashTrail` prefix, cache-first.
    pub fn cashtrail(origin: Url) -> Self {
        Self::new(origin, CASHTRAIL_BASE_PATH, FetchPolicy::CacheFirst)
    }

    /// Root deployment: no prefix, network-first for documents.
    pub fn cashtrail_root(origin: Url) -> Self {
        Self::new(origin, "", FetchPolicy::NetworkFirstForDocuments)
    }

    pub fn with_cache_name(mut self, name: &str) -> Self {
        self.cache_name = name.to_string();
        self
    }

    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = Some(assets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_override(mut self, destination: Destination, strategy: Strategy) -> Self {
        self.overrides.insert(destination, strategy);
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.cache_name.trim().is_empty() {
            return Err(WorkerError::Config("cache_name is empty".to_string()));
        }
        if self.origin.cannot_be_a_base() || !matches!(self.origin.scheme(), "http" | "https") {
            return Err(WorkerError::Config(format!("origin {} is not an http(s) origin", self.origin)));
        }
        if matches!(&self.static_assets, Some(assets) if assets.is_empty()) {
            return Err(WorkerError::Config("static_assets is empty".to_string()));
        }
        for path in self.manifest() {
            self.resolve(&path)?;
        }
        Ok(())
    }

    /// The ordered list of paths to precache.
    pub fn manifest(&self) -> Vec<String> {
        match &self.static_assets {
            Some(assets) => assets.clone(),
            None => CASHTRAIL_ASSETS
                .iter()
                .map(|path| format!("{}{}", self.base_path, path))
                .collect(),
        }
    }

    pub fn offline_fallback_path(&self) -> String {
        self.offline_fallback
            .clone()
            .unwrap_or_else(|| format!("{}/index.html", self.base_path))
    }

    /// Resolve a root-relative path or absolute URL against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, WorkerError> {
        self.origin
            .join(path)
            .map_err(|e| WorkerError::Config(format!("invalid asset path {}: {}", path, e)))
    }

    /// Exact scheme, host and port comparison.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    pub fn policy_table(&self) -> PolicyTable {
        self.overrides
            .iter()
            .fold(self.policy.table(), |table, (destination, strategy)| {
                table.with(*destination, *strategy)
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Request for the offline fallback document, used as a cache key.
    pub fn offline_fallback_request(&self) -> Result<Request, WorkerError> {
        Ok(Request::navigate(self.resolve(&self.offline_fallback_path())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://example.github.io").unwrap()
    }

    #[test]
    fn test_cashtrail_manifest_is_prefixed() {
        let config = WorkerConfig::cashtrail(origin());
        let manifest = config.manifest();
        assert_eq!(manifest.len(), 11);
        assert_eq!(manifest[0], "/CashTrail/");
        assert_eq!(manifest[1], "/CashTrail/index.html");
        assert_eq!(manifest[10], "/CashTrail/icon-512x512.png");
        assert_eq!(config.offline_fallback_path(), "/CashTrail/index.html");
        assert_eq!(config.cache_name, "cashtrail-v1");
    }

    #[test]
    fn test_root_manifest() {
        let config = WorkerConfig::cashtrail_root(origin());
        assert_eq!(config.manifest()[0], "/");
        assert_eq!(config.manifest()[2], "/manifest.json");
        assert_eq!(config.policy, FetchPolicy::NetworkFirstForDocuments);
    }

    #[test]
    fn test_exact_origin_match() {
        let config = WorkerConfig::cashtrail(origin());
        assert!(config.is_same_origin(&Url::parse("https://example.github.io/CashTrail/").unwrap()));
        assert!(!config.is_same_origin(&Url::parse("http://example.github.io/").unwrap()));
        assert!(!config.is_same_origin(&Url::parse("https://example.github.io:444/").unwrap()));
        // Containment is not a match
        assert!(!config
            .is_same_origin(&Url::parse("https://example.github.io.evil.test/").unwrap()));
    }

    #[test]
    fn test_validate() {
        assert!(WorkerConfig::cashtrail(origin()).validate().is_ok());
        assert!(WorkerConfig::cashtrail(origin()).with_cache_name(" ").validate().is_err());
        assert!(WorkerConfig::cashtrail(origin())
            .with_assets(Vec::<String>::new())
            .validate()
            .is_err());
        let data = WorkerConfig::cashtrail(Url::parse("data:text/plain,hi").unwrap());
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{"origin": "https://example.github.io", "base_path": "/CashTrail"}"#;
        let config: WorkerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, WorkerConfig::cashtrail(origin()));
    }

    #[test]
    fn test_overrides_layer_over_policy() {
        let config = WorkerConfig::cashtrail(origin())
            .with_override(Destination::Document, Strategy::NetworkFirst);
        let nav = Request::navigate(config.resolve("/CashTrail/").unwrap());
        let icon = Request::get(config.resolve("/CashTrail/icon-96x96.png").unwrap())
            .with_destination(Destination::Image);
        let table = config.policy_table();
        assert_eq!(table.strategy_for(&nav), Strategy::NetworkFirst);
        assert_eq!(table.strategy_for(&icon), Strategy::CacheFirst);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = WorkerConfig::cashtrail_root(origin()).with_cache_name("cashtrail-v2");
        config.save(&path).unwrap();
        assert_eq!(WorkerConfig::load(&path).unwrap(), config);
    }
}
