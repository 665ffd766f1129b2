//! Which caching strategy answers which kind of request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::http::{Destination, Request};

/// How a single intercepted request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache; go to the network only on a miss.
    CacheFirst,
    /// Go to the network; fall back to the cache when it fails.
    NetworkFirst,
    /// Serve from cache and refresh the entry in the background.
    StaleWhileRevalidate,
}

/// The two deployments of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Cache-first for everything.
    #[default]
    CacheFirst,
    /// Network-first for documents, stale-while-revalidate for everything else.
    NetworkFirstForDocuments,
}

impl FetchPolicy {
    pub fn table(self) -> PolicyTable {
        match self {
            FetchPolicy::CacheFirst => PolicyTable::uniform(Strategy::CacheFirst),
            FetchPolicy::NetworkFirstForDocuments => {
                PolicyTable::uniform(Strategy::StaleWhileRevalidate)
                    .with(Destination::Document, Strategy::NetworkFirst)
            }
        }
    }
}

/// Strategy per destination class, with a default for unlisted classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    default: Strategy,
    overrides: BTreeMap<Destination, Strategy>,
}

impl PolicyTable {
    pub fn uniform(strategy: Strategy) -> Self {
        Self {
            default: strategy,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with(mut self, destination: Destination, strategy: Strategy) -> Self {
        self.overrides.insert(destination, strategy);
        self
    }

    pub fn strategy_for(&self, request: &Request) -> Strategy {
        // Navigations are documents whatever their destination says
        let destination = if request.is_document() {
            Destination::Document
        } else {
            request.destination
        };
        self.overrides.get(&destination).copied().unwrap_or(self.default)
    }
}
