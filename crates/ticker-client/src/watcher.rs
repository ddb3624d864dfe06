// ABOUTME: Job watcher: one direct read, then push updates with poll fallback.
// ABOUTME: Emits job row snapshots until terminal status or cancellation.

use crate::error::StoreError;
use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ticker_types::Job;

/// Re-fetch cadence while the change-feed is unavailable.
pub const POLL_FALLBACK_INTERVAL: Duration = Duration::from_secs(3);

const SNAPSHOT_CHANNEL_BUFFER: usize = 16;

/// Watch one job record, delivering snapshots to the returned receiver.
///
/// Performs an initial direct read, then forwards change-feed updates. If
/// the subscription cannot be established (or ends before a terminal
/// snapshot), degrades to re-fetching every few seconds. The task stops
/// after delivering a terminal snapshot or when `cancel` fires.
pub fn spawn_job_watcher<S: JobStore>(
    store: Arc<S>,
    job_id: String,
    cancel: CancellationToken,
) -> mpsc::Receiver<Job> {
    let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_BUFFER);
    tokio::spawn(watch_job(store, job_id, tx, cancel));
    rx
}

async fn watch_job<S: JobStore>(
    store: Arc<S>,
    job_id: String,
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
) {
    // Initial direct read so the consumer is never waiting on push latency.
    match store.fetch(&job_id).await {
        Ok(Some(job)) => {
            let terminal = job.status.is_terminal();
            if tx.send(job).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        }
        Ok(None) => {
            debug!(job_id = %job_id, "Job not yet visible on initial read");
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Initial job read failed");
        }
    }

    match store.watch(&job_id).await {
        Ok(mut updates) => loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = updates.recv() => match next {
                    Some(job) => {
                        let terminal = job.status.is_terminal();
                        if tx.send(job).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    None => {
                        warn!(job_id = %job_id, "Change-feed ended before terminal status, falling back to polling");
                        break;
                    }
                },
            }
        },
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Change-feed unavailable, falling back to polling");
        }
    }

    poll_job(store, &job_id, tx, cancel).await;
}

async fn poll_job<S: JobStore>(
    store: Arc<S>,
    job_id: &str,
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(POLL_FALLBACK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match store.fetch(job_id).await {
            Ok(Some(job)) => {
                let terminal = job.status.is_terminal();
                if tx.send(job).await.is_err() {
                    return;
                }
                if terminal {
                    return;
                }
            }
            Ok(None) => {
                debug!(job_id = %job_id, "Job still not visible while polling");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Poll re-fetch failed");
            }
        }
    }
}
