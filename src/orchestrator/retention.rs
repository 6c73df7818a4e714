//! Periodic retention for records and transcripts.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::supervisor::Supervisor;

/// Spawn the retention background task.
///
/// Runs [`Supervisor::prune`] every `interval`, the first pass immediately.
#[must_use]
pub fn spawn_retention_task(
    supervisor: Supervisor,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = supervisor.prune().await {
                        error!(%err, "retention prune failed");
                    }
                }
            }
        }
    })
}
