//! Spin-wait lock acquisition shared by every backend
//!
//! A lock is a scalar entry at [`lock_key`](crate::keys::lock_key) written
//! with a conditional set. There is no fencing token: a holder that outlives
//! its hold TTL silently loses the lock, so protected sections must tolerate
//! being superseded.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::{CacheError, CacheResult};

/// Interval between two conditional-set attempts
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Call `attempt` until it reports success or `acquire_timeout` elapses.
///
/// The first attempt is made immediately. Errors from `attempt` abort the
/// loop and are returned unchanged.
pub async fn acquire_with_retry<F, Fut>(
    name: &str,
    acquire_timeout: Duration,
    mut attempt: F,
) -> CacheResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CacheResult<bool>>,
{
    let deadline = Instant::now() + acquire_timeout;
    let mut ticker = tokio::time::interval(LOCK_RETRY_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts = 0u32;
    loop {
        ticker.tick().await;
        attempts += 1;

        if attempt().await? {
            debug!("Acquired lock {} after {} attempt(s)", name, attempts);
            return Ok(());
        }

        if Instant::now() >= deadline {
            debug!("Gave up on lock {} after {} attempt(s)", name, attempts);
            return Err(CacheError::LockTimeout(name.to_string()));
        }
    }
}
