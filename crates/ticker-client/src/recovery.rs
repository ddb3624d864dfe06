// ABOUTME: Bounded recovery polling for jobs whose creation response was lost.
// ABOUTME: Five attempts with linearly increasing delay, newest-job-wins.

use crate::store::JobStore;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum recovery attempts after a timeout-classified submission failure.
pub const RECOVERY_ATTEMPTS: u32 = 5;

/// Attempt `i` (1-indexed) waits `i * RECOVERY_STEP` before querying.
pub const RECOVERY_STEP: Duration = Duration::from_secs(2);

/// Only jobs created within this window of "now" are recovery candidates.
/// Bounds the cost of adopting a job from an unrelated, much older send.
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(120);

/// Look for a recently created job belonging to the chat.
///
/// Returns the job id on the first attempt that finds a match, or `None`
/// once all attempts are exhausted (~30s of added wall-clock latency).
/// A failed query counts as a miss for that attempt, not as failure of
/// the whole recovery.
pub async fn recover_job<S: JobStore + ?Sized>(
    store: &S,
    chat_id: &str,
    window: Duration,
) -> Option<String> {
    for attempt in 1..=RECOVERY_ATTEMPTS {
        tokio::time::sleep(RECOVERY_STEP * attempt).await;

        match store.latest_for_chat(chat_id, window).await {
            Ok(Some(job)) => {
                info!(
                    chat_id = %chat_id,
                    job_id = %job.id,
                    attempt = attempt,
                    "Recovered job after lost submission response"
                );
                return Some(job.id);
            }
            Ok(None) => {
                debug!(chat_id = %chat_id, attempt = attempt, "No recent job found");
            }
            Err(e) => {
                warn!(chat_id = %chat_id, attempt = attempt, error = %e, "Recovery query failed");
            }
        }
    }

    info!(chat_id = %chat_id, "Recovery exhausted without finding a job");
    None
}
