use async_trait::async_trait;
use cashtrail_offline_core::WorkerHost;
use tracing::info;

/// There are no pages to take over from the command line, so the
/// lifecycle signals are only logged.
pub struct CliHost;

#[async_trait]
impl WorkerHost for CliHost {
    async fn skip_waiting(&self) {
        info!("Skip waiting");
    }

    async fn claim_clients(&self) {
        info!("Claiming clients");
    }
}
