//! Lifecycle plumbing between the worker and its host.
//!
//! - `WorkerHost`: the skip-waiting and claim-clients signals
//! - `ExtendableEvent`: wait-until, keeping async work alive past a response
//! - `FetchOutcome`: respond-with, or let the request through untouched

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::debug;

use crate::http::Response;

/// Signals the worker sends to the runtime hosting it.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Activate this version now instead of waiting for old clients to close.
    async fn skip_waiting(&self);

    /// Route already-open pages through this version.
    async fn claim_clients(&self);
}

/// Host that only remembers which signals it received.
#[derive(Debug, Default)]
pub struct RecordingHost {
    skipped_waiting: AtomicBool,
    claimed_clients: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped_waiting(&self) -> bool {
        self.skipped_waiting.load(Ordering::SeqCst)
    }

    pub fn claimed_clients(&self) -> bool {
        self.claimed_clients.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for RecordingHost {
    async fn skip_waiting(&self) {
        self.skipped_waiting.store(true, Ordering::SeqCst);
    }

    async fn claim_clients(&self) {
        self.claimed_clients.store(true, Ordering::SeqCst);
    }
}

/// Registration state of the worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this version will never become active.
    Redundant,
}

/// Event whose lifetime can be extended by background work.
///
/// Work passed to `wait_until` is spawned on the current tokio runtime.
/// `settled` waits for all of it. Dropping the event aborts whatever is
/// still running, the same as the runtime tearing the worker down.
#[derive(Debug, Default)]
pub struct ExtendableEvent {
    tasks: Mutex<JoinSet<()>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.spawn(work);
    }

    pub fn pending(&self) -> usize {
        match self.tasks.lock() {
            Ok(tasks) => tasks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub async fn settled(self) {
        let mut tasks = match self.tasks.into_inner() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                debug!(error = %e, "Background task did not finish");
            }
        }
    }
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// A different cached entry stood in for the one requested.
    Fallback,
    /// Made up locally (the 204 and 503 placeholders).
    Synthesized,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The worker answers the request.
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// Not ours: the host performs its default network handling.
    Passthrough,
}

impl FetchOutcome {
    pub fn respond(response: Response, source: ResponseSource) -> Self {
        FetchOutcome::Respond { response, source }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settled_waits_for_all_work() {
        let event = ExtendableEvent::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            event.wait_until(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(event.pending(), 3);
        event.settled().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settled_survives_panicking_work() {
        let event = ExtendableEvent::new();
        event.wait_until(async { panic!("refresh blew up") });
        event.settled().await;
    }

    #[tokio::test]
    async fn test_recording_host() {
        let host = RecordingHost::new();
        assert!(!host.skipped_waiting());
        host.skip_waiting().await;
        host.claim_clients().await;
        assert!(host.skipped_waiting());
        assert!(host.claimed_clients());
    }
}
