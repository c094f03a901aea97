//! # Long Poll Watcher
//!
//! Drives the direct-message stream of one account: handshake, then a loop of
//! incremental history fetches with adaptive sleep between them.
//!
//! ## Workflow:
//! 1.  `start_watch` adopts any caller-supplied cursor, runs the handshake on
//!     the first start and spawns the loop task.
//! 2.  Every tick fetches the history after the current `ts`/`pts` and
//!     publishes `NewEvents` followed by `NewMessages`.
//! 3.  The delay before the next tick grows while nothing arrives and resets
//!     on activity.
//! 4.  `stop_watch` cancels the pending sleep; the cursor and the handshake
//!     survive, so a later start resumes without a new handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::configs::{LongPollOptions, RetryOptions};
use crate::core::{Dispatcher, RetryPolicy, WatchEvent};
use crate::error::WatchError;
use crate::model::{Cursor, HistoryRequest, LongPollHistory, StartWatch, WatcherState};
use crate::remote::LongPollApi;
use crate::watchers::{spawn_watch_loop, SleepStep};

struct PollState {
    cursor: Cursor,
    sleep: SleepStep,
}

struct Inner<A> {
    api: Arc<A>,
    options: LongPollOptions,
    handshake_retry: RetryPolicy,
    history_retry: RetryPolicy,
    dispatcher: Arc<Dispatcher>,
    enabled: AtomicBool,
    active: AtomicBool,
    stopped_once: AtomicBool,
    /// Held for the whole tick, so ticks and starts never interleave.
    state: AsyncMutex<PollState>,
    loop_token: Mutex<Option<CancellationToken>>,
}

pub struct LongPollWatcher<A: LongPollApi + 'static> {
    inner: Arc<Inner<A>>,
}

impl<A: LongPollApi + 'static> LongPollWatcher<A> {
    pub fn new(
        api: Arc<A>,
        options: LongPollOptions,
        retry: &RetryOptions,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let sleep = SleepStep::new(options.max_sleep_steps, options.step_sleep_time_msec);
        Self {
            inner: Arc::new(Inner {
                api,
                options,
                handshake_retry: RetryPolicy::counted(retry),
                history_retry: RetryPolicy::free_rate_limit(retry),
                dispatcher,
                enabled: AtomicBool::new(false),
                active: AtomicBool::new(false),
                stopped_once: AtomicBool::new(false),
                state: AsyncMutex::new(PollState {
                    cursor: Cursor::default(),
                    sleep,
                }),
                loop_token: Mutex::new(None),
            }),
        }
    }

    /// # Start Watch
    ///
    /// Starts (or resumes) the loop. A supplied `ts`/`pts` replaces the stored
    /// cursor. The handshake only runs until it has succeeded once.
    ///
    /// # Errors
    /// `WatchError::Handshake` when the handshake fails; the watcher stays inactive.
    pub async fn start_watch(&self, start: StartWatch) -> Result<(), WatchError> {
        let inner = &self.inner;
        if inner.active.swap(true, Ordering::SeqCst) {
            log::trace!("Long poll watcher for {} is already active", inner.api.target());
            return Ok(());
        }

        {
            let mut state = inner.state.lock().await;
            if start.ts.is_some() {
                state.cursor.ts = start.ts;
            }
            if start.pts.is_some() {
                state.cursor.pts = start.pts;
            }

            if !inner.enabled.load(Ordering::SeqCst) {
                if let Err(source) = inner.handshake(&mut state.cursor).await {
                    inner.active.store(false, Ordering::SeqCst);
                    return Err(WatchError::Handshake {
                        target: inner.api.target(),
                        source: Box::new(source),
                    });
                }
                inner.enabled.store(true, Ordering::SeqCst);
            }
        }

        self.schedule();
        log::info!("Long poll watcher for {} started", inner.api.target());
        Ok(())
    }

    /// Stops the loop after the current tick; keeps the cursor and handshake.
    pub fn stop_watch(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stopped_once.store(true, Ordering::SeqCst);
        if let Some(token) = self.inner.take_token() {
            token.cancel();
        }
        log::info!("Long poll watcher for {} stopped", self.inner.api.target());
    }

    fn schedule(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.replace_token(token.clone()) {
            previous.cancel();
        }
        let inner = Arc::clone(&self.inner);
        spawn_watch_loop(token, move || {
            let inner = Arc::clone(&inner);
            async move { inner.watch_step().await }
        });
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WatcherState {
        WatcherState::from_flags(
            self.is_enabled(),
            self.is_active(),
            self.inner.stopped_once.load(Ordering::SeqCst),
        )
    }

    /// Current cursor; waits for a running tick to finish.
    pub async fn cursor(&self) -> Cursor {
        self.inner.state.lock().await.cursor
    }

    pub async fn ts(&self) -> Option<u64> {
        self.cursor().await.ts
    }

    pub async fn pts(&self) -> Option<u64> {
        self.cursor().await.pts
    }

    pub fn target(&self) -> String {
        self.inner.api.target()
    }
}

impl<A: LongPollApi + 'static> Drop for LongPollWatcher<A> {
    fn drop(&mut self) {
        self.stop_watch();
    }
}

impl<A: LongPollApi> Inner<A> {
    fn take_token(&self) -> Option<CancellationToken> {
        self.loop_token.lock().expect("Loop token lock poisoned").take()
    }

    fn replace_token(&self, token: CancellationToken) -> Option<CancellationToken> {
        self.loop_token
            .lock()
            .expect("Loop token lock poisoned")
            .replace(token)
    }

    async fn handshake(&self, cursor: &mut Cursor) -> Result<(), WatchError> {
        let need_pts = cursor.pts.is_none();
        let lp_version = self.options.long_poll_version;
        let server = self
            .handshake_retry
            .execute("messages.getLongPollServer", || {
                self.api.get_long_poll_server(need_pts, lp_version)
            })
            .await?;

        let ts = server.ts.trim().parse::<u64>().map_err(|e| {
            WatchError::MalformedResponse(format!("long poll ts '{}': {}", server.ts, e))
        })?;
        cursor.ts = Some(ts);
        if server.pts.is_some() {
            cursor.pts = server.pts;
        }
        log::debug!(
            "Long poll handshake for {}: ts={} pts={:?}",
            self.api.target(),
            ts,
            cursor.pts
        );
        Ok(())
    }

    async fn fetch_history(&self, cursor: &mut Cursor) -> Result<LongPollHistory, WatchError> {
        let ts = match cursor.ts {
            Some(ts) => ts,
            None => {
                self.handshake(cursor).await?;
                cursor
                    .ts
                    .ok_or_else(|| WatchError::MalformedResponse("handshake returned no ts".into()))?
            }
        };

        let request = HistoryRequest {
            ts,
            pts: cursor.pts,
            preview_length: self.options.history_preview_length,
            onlines: self.options.history_onlines,
            fields: self.options.history_fields.clone(),
            lp_version: self.options.long_poll_version,
        };
        let history = self
            .history_retry
            .execute("messages.getLongPollHistory", || {
                self.api.get_long_poll_history(&request)
            })
            .await?;

        if cursor.pts != Some(history.new_pts) && !cursor.advance_pts(history.new_pts) {
            log::warn!(
                "Ignoring new_pts {} older than current pts {:?} for {}",
                history.new_pts,
                cursor.pts,
                self.api.target()
            );
        }
        Ok(history)
    }

    async fn watch_step(&self) -> Option<Duration> {
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }
        let mut state = self.state.lock().await;
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }

        let state = &mut *state;
        match self.fetch_history(&mut state.cursor).await {
            Ok(history) if !history.is_empty() => {
                state.sleep.on_activity();
                let target = self.api.target();
                let messages = history.messages.clone();
                log::debug!(
                    "{} new events, {} new messages for {}",
                    history.history.len(),
                    messages.len(),
                    target
                );
                self.dispatcher.publish(WatchEvent::NewEvents {
                    target: target.clone(),
                    history,
                });
                if !messages.is_empty() {
                    self.dispatcher
                        .publish(WatchEvent::NewMessages { target, messages });
                }
            }
            Ok(_) => state.sleep.on_empty(),
            Err(e) => log::error!("Long poll tick for {} failed: {}", self.api.target(), e),
        }

        Some(state.sleep.delay())
    }
}
