//! Restarts a worker task under exponential backoff after an unhandled
//! fault, mirroring the retry/backoff shape used for database connection
//! setup elsewhere in this corpus, generalized into a long-lived supervisor
//! loop (spec §4.6).

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);
const HEALTHY_UPTIME: Duration = Duration::from_secs(2 * 60);
const MAX_CONSECUTIVE_FAST_FAILURES: u32 = 10;

/// Runs `make_task` repeatedly until it returns `Ok(())` (clean shutdown,
/// exits silently) or the failure budget is exhausted (signals `cancel`).
pub async fn supervise<F, Fut>(name: &str, cancel: CancellationToken, mut make_task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut consecutive_fast_failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let started_at = Instant::now();
        match make_task().await {
            Ok(()) => {
                info!(worker = name, "worker exited cleanly");
                return;
            }
            Err(err) => {
                error!(worker = name, %err, "worker faulted");

                if started_at.elapsed() >= HEALTHY_UPTIME {
                    backoff = INITIAL_BACKOFF;
                    consecutive_fast_failures = 0;
                } else {
                    consecutive_fast_failures += 1;
                }

                if consecutive_fast_failures >= MAX_CONSECUTIVE_FAST_FAILURES {
                    error!(
                        worker = name,
                        consecutive_fast_failures, "too many fast failures, signalling shutdown"
                    );
                    cancel.cancel();
                    return;
                }

                warn!(worker = name, ?backoff, "restarting after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
