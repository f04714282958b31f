//! Bounded polling.

use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll period used by the CLI's connect and receive waits.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Polls `condition` every `period` until it holds or `timeout` elapses.
/// Returns whether the condition was met. A progress dot goes to stderr per
/// unsuccessful poll.
///
/// Busy-waiting is acceptable here only because every caller bounds the wait
/// to a few seconds.
pub async fn wait_until<F>(mut condition: F, timeout: Duration, period: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        eprint!(".");
        sleep(period).await;
    }
    false
}
