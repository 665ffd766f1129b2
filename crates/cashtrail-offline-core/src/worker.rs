//! The offline cache manager: install, activate and fetch handlers.
//!
//! Install precaches the static manifest into the store named by the
//! current cache version, all-or-nothing. Activate deletes every other
//! store and claims open clients. Fetch answers same-origin GETs with the
//! strategy the policy table picks for the request's destination.

use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use reqwest::Method;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::event::{ExtendableEvent, FetchOutcome, ResponseSource, WorkerHost, WorkerState};
use crate::http::{CacheKey, Request, Response};
use crate::network::Network;
use crate::policy::{PolicyTable, Strategy};
use crate::store::{CacheStorage, CachedResponse};

/// Result of an activation cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivateSummary {
    pub deleted: Vec<String>,
    /// Stale stores that could not be deleted; retried on the next activation.
    pub failed: Vec<String>,
}

pub struct OfflineCacheManager<S, N, H> {
    config: Arc<WorkerConfig>,
    policies: PolicyTable,
    storage: Arc<S>,
    network: Arc<N>,
    host: H,
    state: Mutex<WorkerState>,
}

impl<S, N, H> OfflineCacheManager<S, N, H>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    H: WorkerHost,
{
    pub fn new(config: WorkerConfig, storage: Arc<S>, network: Arc<N>, host: H) -> Result<Self, WorkerError> {
        config.validate()?;
        let policies = config.policy_table();
        Ok(Self {
            config: Arc::new(config),
            policies,
            storage,
            network,
            host,
            state: Mutex::new(WorkerState::Parsed),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn state(&self) -> WorkerState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(from = ?*state, to = ?next, "Worker state change");
        *state = next;
    }

    // ===== Install =====

    /// Precache the manifest, then ask the host to activate immediately.
    ///
    /// Nothing is written unless every asset fetched with a 2xx status.
    pub async fn on_install(&self) -> Result<(), WorkerError> {
        info!(cache = %self.config.cache_name, "Installing");
        self.set_state(WorkerState::Installing);

        match self.precache().await {
            Ok(count) => {
                info!(cache = %self.config.cache_name, assets = count, "Cached static assets");
                self.set_state(WorkerState::Installed);
                self.host.skip_waiting().await;
                Ok(())
            }
            Err(e) => {
                error!(cache = %self.config.cache_name, error = %e, "Cache failed");
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, WorkerError> {
        let requests = self
            .config
            .manifest()
            .into_iter()
            .map(|path| -> Result<(String, Request), WorkerError> {
                let url = self.config.resolve(&path)?;
                Ok((path, Request::get(url)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = requests.iter().map(|(path, request)| async move {
            let response = self
                .network
                .fetch(request)
                .await
                .map_err(|source| WorkerError::Install {
                    path: path.clone(),
                    source,
                })?;
            if !response.ok() {
                return Err(WorkerError::InstallStatus {
                    path: path.clone(),
                    status: response.status,
                });
            }
            Ok::<_, WorkerError>((request.cache_key(), response))
        });
        let entries = try_join_all(fetches).await?;

        let count = entries.len();
        self.storage.put_all(&self.config.cache_name, entries).await?;
        Ok(count)
    }

    // ===== Activate =====

    /// Delete every store but the current one, then claim open clients.
    ///
    /// Deletion failures are logged and left for the next activation.
    /// Clients are claimed even when the store listing itself fails; that
    /// error is returned afterwards.
    pub async fn on_activate(&self) -> Result<ActivateSummary, WorkerError> {
        info!(cache = %self.config.cache_name, "Activating");
        self.set_state(WorkerState::Activating);

        let cleanup = self.delete_stale_stores().await;

        self.host.claim_clients().await;
        self.set_state(WorkerState::Activated);
        info!(cache = %self.config.cache_name, "Activated");

        cleanup
    }

    async fn delete_stale_stores(&self) -> Result<ActivateSummary, WorkerError> {
        let names = self.storage.keys().await.map_err(|e| {
            warn!(error = %e, "Failed to list cache stores");
            e
        })?;

        let mut summary = ActivateSummary::default();
        for name in names.into_iter().filter(|n| *n != self.config.cache_name) {
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!(cache = %name, "Deleted stale cache");
                    summary.deleted.push(name);
                }
                Ok(false) => debug!(cache = %name, "Stale cache already gone"),
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete stale cache");
                    summary.failed.push(name);
                }
            }
        }
        Ok(summary)
    }

    // ===== Fetch =====

    /// Decide the response for an intercepted request.
    ///
    /// Non-GET and cross-origin requests come back as `Passthrough` without
    /// touching the cache. Background refreshes are registered on `event`.
    pub async fn on_fetch(&self, request: &Request, event: &ExtendableEvent) -> Result<FetchOutcome, WorkerError> {
        if request.method != Method::GET {
            debug!(method = %request.method, url = %request.url, "Skipping non-GET request");
            return Ok(FetchOutcome::Passthrough);
        }
        if !self.config.is_same_origin(&request.url) {
            debug!(url = %request.url, "Skipping cross-origin request");
            return Ok(FetchOutcome::Passthrough);
        }

        let strategy = self.policies.strategy_for(request);
        debug!(url = %request.url, strategy = ?strategy, "Intercepting request");
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, event).await,
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key).await {
            return Ok(FetchOutcome::respond(cached.response, ResponseSource::Cache));
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(key, &response).await;
                Ok(FetchOutcome::respond(response, ResponseSource::Network))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, using offline fallback");
                if request.is_document() {
                    let fallback = self.config.offline_fallback_request()?.cache_key();
                    return match self.lookup(&fallback).await {
                        Some(cached) => Ok(FetchOutcome::respond(cached.response, ResponseSource::Fallback)),
                        None => Err(e.into()),
                    };
                }
                Self::image_placeholder(request).ok_or_else(|| e.into())
            }
        }
    }

    async fn network_first(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        let key = request.cache_key();
        match self.network.fetch(request).await {
            Ok(response) => {
                // Whatever the network answered replaces the entry, error pages included
                self.store(key, &response).await;
                Ok(FetchOutcome::respond(response, ResponseSource::Network))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                if let Some(cached) = self.lookup(&key).await {
                    return Ok(FetchOutcome::respond(cached.response, ResponseSource::Cache));
                }
                Ok(Self::image_placeholder(request).unwrap_or_else(|| {
                    FetchOutcome::respond(Response::service_unavailable(), ResponseSource::Synthesized)
                }))
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
        event: &ExtendableEvent,
    ) -> Result<FetchOutcome, WorkerError> {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key).await {
            event.wait_until(revalidate(
                self.storage.clone(),
                self.network.clone(),
                self.config.cache_name.clone(),
                request.clone(),
            ));
            return Ok(FetchOutcome::respond(cached.response, ResponseSource::Cache));
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(key, &response).await;
                Ok(FetchOutcome::respond(response, ResponseSource::Network))
            }
            Err(e) => Self::image_placeholder(request).ok_or_else(|| e.into()),
        }
    }

    fn image_placeholder(request: &Request) -> Option<FetchOutcome> {
        request
            .is_image()
            .then(|| FetchOutcome::respond(Response::no_content(), ResponseSource::Synthesized))
    }

    /// Read from the current store. A storage failure counts as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        match self.storage.match_in(&self.config.cache_name, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(cache = %self.config.cache_name, key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Write a copy of a 200 same-origin response. Failures never reach the caller.
    async fn store_if_cacheable(&self, key: CacheKey, response: &Response) {
        if !response.is_cacheable() {
            debug!(key = %key, status = response.status, "Not caching response");
            return;
        }
        self.store(key, response).await;
    }

    async fn store(&self, key: CacheKey, response: &Response) {
        if let Err(e) = self
            .storage
            .put(&self.config.cache_name, key.clone(), response.clone())
            .await
        {
            warn!(cache = %self.config.cache_name, key = %key, error = %e, "Cache write failed");
        }
    }
}

/// Refresh one cached entry from the network. Every failure is swallowed.
async fn revalidate<S, N>(storage: Arc<S>, network: Arc<N>, cache_name: String, request: Request)
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let response = match network.fetch(&request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %request.url, error = %e, "Background refresh failed");
            return;
        }
    };
    if !response.is_cacheable() {
        debug!(url = %request.url, status = response.status, "Background refresh not cacheable");
        return;
    }
    match storage.put(&cache_name, request.cache_key(), response).await {
        Ok(()) => debug!(url = %request.url, "Background refresh stored"),
        Err(e) => warn!(cache = %cache_name, url = %request.url, error = %e, "Background refresh write failed"),
    }
}
