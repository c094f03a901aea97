//! # Watchers Module
//!
//! The recurring parts of the engine.
//!
//! ## Contained Modules:
//! - **`backoff`**: the sleep-step multiplier both watch loops share.
//! - **`long_poll`**: handshake, incremental history fetch and adaptive sleep
//!   for the direct-message stream.
//! - **`page_fetcher`**: one paginated wall read with its stop conditions and
//!   the pure per-page filter.
//! - **`wall`**: the recurring wall watch with pinned-post tracking.
//!
//! Each watcher owns a single loop task. The task sleeps for the delay the
//! previous tick returned and then runs the next tick, so ticks of one watcher
//! never overlap and the delay can change from tick to tick.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Sleep-step backoff.
pub mod backoff;
/// Direct-message long-poll watcher.
pub mod long_poll;
/// Paginated incremental wall reads.
pub mod page_fetcher;
/// Recurring wall watcher.
pub mod wall;

// --- Public API Re-exports ---
pub use backoff::SleepStep;
pub use long_poll::LongPollWatcher;
pub use page_fetcher::{filter_page, PageFetcher, PageSink};
pub use wall::WallWatcher;

/// Runs `tick` after a zero delay, then after whatever delay the previous tick
/// returned, until the tick returns `None` or `token` is cancelled.
///
/// Cancellation only interrupts the sleep; a tick already running finishes.
pub(crate) fn spawn_watch_loop<F, Fut>(token: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Option<Duration>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sleep(delay) => {}
            }
            match tick().await {
                Some(next) => delay = next,
                None => break,
            }
        }
        log::trace!("Watch loop finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_loop_uses_returned_delays_and_stops_on_none() {
        let ticks = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();
        let handle = {
            let ticks = Arc::clone(&ticks);
            spawn_watch_loop(CancellationToken::new(), move || {
                let ticks = Arc::clone(&ticks);
                async move {
                    let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                    (n < 3).then(|| Duration::from_millis(100 * u64::from(n)))
                }
            })
        };

        handle.await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_the_sleep() {
        let token = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = {
            let ticks = Arc::clone(&ticks);
            spawn_watch_loop(token.clone(), move || {
                let ticks = Arc::clone(&ticks);
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Some(Duration::from_secs(60))
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
