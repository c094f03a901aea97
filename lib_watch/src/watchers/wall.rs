//! # Wall Watcher
//!
//! Recurring incremental reads of one wall. Every tick loads everything newer
//! than the last delivered post, watches the top of the first page for pinned
//! post changes and backs off while the wall is quiet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::configs::{RetryOptions, WallWatchOptions};
use crate::core::{Dispatcher, RetryPolicy, WatchEvent};
use crate::error::WatchError;
use crate::model::{LoadParams, StartWallWatch, WallPost, WallWatermark, WatcherState};
use crate::remote::WallApi;
use crate::watchers::page_fetcher::{PageFetcher, PageSink};
use crate::watchers::{spawn_watch_loop, SleepStep};

#[derive(Debug, Clone, Copy)]
enum SliceEvent {
    NewPosts,
    LoadedPosts,
}

/// Tracks the pinned post on the first page and optionally publishes each slice.
struct WallSink<'a> {
    owner_id: i64,
    watermark: &'a mut WallWatermark,
    dispatcher: &'a Dispatcher,
    inform: Option<SliceEvent>,
    /// Newest regular post on the first page. Only committed to the
    /// watermark once the whole read has succeeded.
    newest_id: Option<i64>,
}

impl<'a> WallSink<'a> {
    fn new(
        owner_id: i64,
        watermark: &'a mut WallWatermark,
        dispatcher: &'a Dispatcher,
        inform: Option<SliceEvent>,
    ) -> Self {
        Self {
            owner_id,
            watermark,
            dispatcher,
            inform,
            newest_id: None,
        }
    }
}

impl WallSink<'_> {
    fn observe_first_page(&mut self, page: &[WallPost]) {
        let Some(top) = page.first() else {
            return;
        };

        let fixed = if top.is_pinned { top.id } else { -1 };
        if fixed != self.watermark.fixed_post_id {
            log::info!(
                "Pinned post of wall {} changed: {} -> {}",
                self.owner_id,
                self.watermark.fixed_post_id,
                fixed
            );
            self.watermark.fixed_post_id = fixed;
            self.dispatcher.publish(WatchEvent::PinnedPostChanged {
                owner_id: self.owner_id,
                post_id: self.watermark.pinned(),
            });
        }

        let newest = if top.is_pinned { page.get(1) } else { Some(top) };
        self.newest_id = newest.map(|post| post.id);
    }
}

impl PageSink for WallSink<'_> {
    fn on_page(&mut self, offset: u32, page: &[WallPost]) {
        if offset == 0 {
            self.observe_first_page(page);
        }
    }

    fn on_slice(&mut self, slice: &[WallPost]) {
        let owner_id = self.owner_id;
        let posts = slice.to_vec();
        let event = match self.inform {
            Some(SliceEvent::NewPosts) => WatchEvent::NewPosts { owner_id, posts },
            Some(SliceEvent::LoadedPosts) => WatchEvent::LoadedPosts { owner_id, posts },
            None => return,
        };
        self.dispatcher.publish(event);
    }
}

struct WallState {
    watermark: WallWatermark,
    sleep: SleepStep,
}

struct Inner<A> {
    api: Arc<A>,
    owner_id: i64,
    options: WallWatchOptions,
    retry: RetryPolicy,
    dispatcher: Arc<Dispatcher>,
    enabled: AtomicBool,
    active: AtomicBool,
    stopped_once: AtomicBool,
    state: AsyncMutex<WallState>,
    loop_token: Mutex<Option<CancellationToken>>,
}

pub struct WallWatcher<A: WallApi + 'static> {
    inner: Arc<Inner<A>>,
}

impl<A: WallApi + 'static> WallWatcher<A> {
    /// Watcher of the wall of `owner_id` (negative for communities).
    pub fn new(
        api: Arc<A>,
        owner_id: i64,
        options: WallWatchOptions,
        retry: &RetryOptions,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let sleep = SleepStep::new(options.max_sleep_steps, options.step_sleep_time_msec);
        Self {
            inner: Arc::new(Inner {
                api,
                owner_id,
                options,
                retry: RetryPolicy::counted(retry),
                dispatcher,
                enabled: AtomicBool::new(false),
                active: AtomicBool::new(false),
                stopped_once: AtomicBool::new(false),
                state: AsyncMutex::new(WallState {
                    watermark: WallWatermark::default(),
                    sleep,
                }),
                loop_token: Mutex::new(None),
            }),
        }
    }

    /// # Start
    ///
    /// Starts (or resumes) the watch loop. Supplied ids replace the stored
    /// watermark; without a `last_post_id` the first tick delivers the whole wall.
    pub async fn start(&self, start: StartWallWatch) {
        let inner = &self.inner;
        if inner.active.swap(true, Ordering::SeqCst) {
            log::trace!("Wall watcher for {} is already active", inner.owner_id);
            return;
        }

        {
            let mut state = inner.state.lock().await;
            if let Some(last_post_id) = start.last_post_id {
                state.watermark.last_seen_id = last_post_id;
            }
            if let Some(fixed_post_id) = start.fixed_post_id {
                state.watermark.fixed_post_id = fixed_post_id;
            }
        }
        inner.enabled.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        if let Some(previous) = inner.replace_token(token.clone()) {
            previous.cancel();
        }
        let task_inner = Arc::clone(inner);
        spawn_watch_loop(token, move || {
            let inner = Arc::clone(&task_inner);
            async move { inner.watch_step().await }
        });
        log::info!("Wall watcher for {} started", inner.owner_id);
    }

    /// Stops the loop after the current tick; the watermark is kept.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.stopped_once.store(true, Ordering::SeqCst);
        if let Some(token) = self.inner.take_token() {
            token.cancel();
        }
        log::info!("Wall watcher for {} stopped", self.inner.owner_id);
    }

    /// # Load Posts
    ///
    /// Ad-hoc paginated read outside the watch loop. With `inform` every
    /// filtered page is also published as `LoadedPosts` while loading.
    /// Pinned post changes are tracked, the last delivered post id is not.
    ///
    /// # Errors
    /// `WatchError::PageLoad` when a page fails after all retries.
    pub async fn load_posts(
        &self,
        params: LoadParams,
        inform: bool,
    ) -> Result<Vec<WallPost>, WatchError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let mut sink = WallSink::new(
            inner.owner_id,
            &mut state.watermark,
            &inner.dispatcher,
            inform.then_some(SliceEvent::LoadedPosts),
        );
        let posts = PageFetcher::new(&*inner.api, &inner.retry, inner.options.page_size())
            .fetch(inner.owner_id, &params, &mut sink)
            .await?;
        log::debug!("Loaded {} posts from wall {}", posts.len(), inner.owner_id);
        Ok(posts)
    }

    pub fn owner_id(&self) -> i64 {
        self.inner.owner_id
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

    pub async fn watermark(&self) -> WallWatermark {
        self.inner.state.lock().await.watermark
    }

    pub async fn last_post_id(&self) -> i64 {
        self.watermark().await.last_seen_id
    }

    /// Id of the pinned post, `None` when nothing is pinned.
    pub async fn fixed_post_id(&self) -> Option<i64> {
        self.watermark().await.pinned()
    }
}

impl<A: WallApi + 'static> Drop for WallWatcher<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<A: WallApi> Inner<A> {
    fn take_token(&self) -> Option<CancellationToken> {
        self.loop_token.lock().expect("Loop token lock poisoned").take()
    }

    fn replace_token(&self, token: CancellationToken) -> Option<CancellationToken> {
        self.loop_token
            .lock()
            .expect("Loop token lock poisoned")
            .replace(token)
    }

    async fn watch_step(&self) -> Option<Duration> {
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }
        let mut guard = self.state.lock().await;
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }

        let state = &mut *guard;
        let params = LoadParams::newer_than(state.watermark.last_seen_id);
        let inform_immediately = self.options.inform_immediately;
        let mut sink = WallSink::new(
            self.owner_id,
            &mut state.watermark,
            &self.dispatcher,
            inform_immediately.then_some(SliceEvent::NewPosts),
        );
        let fetched = PageFetcher::new(&*self.api, &self.retry, self.options.page_size())
            .with_probe(self.options.probe_size())
            .fetch(self.owner_id, &params, &mut sink)
            .await;
        let newest_id = sink.newest_id;

        match fetched {
            Ok(posts) => {
                // posts are newest first
                let delivered = posts.first().map(|post| post.id);
                for id in newest_id.into_iter().chain(delivered) {
                    state.watermark.observe(id);
                }
                if posts.is_empty() {
                    state.sleep.on_empty();
                } else {
                    state.sleep.on_activity();
                    log::debug!("{} new posts on wall {}", posts.len(), self.owner_id);
                    if !inform_immediately {
                        self.dispatcher.publish(WatchEvent::NewPosts {
                            owner_id: self.owner_id,
                            posts,
                        });
                    }
                }
            }
            Err(e) => log::error!(
                "Wall tick for {} failed, keeping last post {}: {}",
                self.owner_id,
                state.watermark.last_seen_id,
                e
            ),
        }

        Some(state.sleep.delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::page_fetcher::tests::{ids, post, FakeWall};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn watcher_with(
        wall: FakeWall,
        options: WallWatchOptions,
    ) -> (Arc<FakeWall>, Arc<Dispatcher>, WallWatcher<FakeWall>) {
        let wall = Arc::new(wall);
        let dispatcher = Arc::new(Dispatcher::new());
        let watcher = WallWatcher::new(
            Arc::clone(&wall),
            -7,
            options,
            &RetryOptions::default(),
            Arc::clone(&dispatcher),
        );
        (wall, dispatcher, watcher)
    }

    fn watcher(wall: FakeWall) -> (Arc<FakeWall>, Arc<Dispatcher>, WallWatcher<FakeWall>) {
        watcher_with(wall, WallWatchOptions::default())
    }

    /// Marks the watcher active with a known watermark, without spawning the loop.
    async fn arm(watcher: &WallWatcher<FakeWall>, last_seen_id: i64, fixed_post_id: i64) {
        watcher.inner.state.lock().await.watermark = WallWatermark {
            last_seen_id,
            fixed_post_id,
        };
        watcher.inner.enabled.store(true, Ordering::SeqCst);
        watcher.inner.active.store(true, Ordering::SeqCst);
    }

    fn drain(rx: &mut UnboundedReceiver<Arc<WatchEvent>>) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn ms(millis: u64) -> Option<Duration> {
        Some(Duration::from_millis(millis))
    }

    #[tokio::test]
    async fn test_pinned_change_fires_once_and_is_not_a_new_post() {
        let wall = FakeWall::with_range(60, 1);
        wall.pin(Some(42));
        let (wall, dispatcher, watcher) = watcher(wall);
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 60, 42).await;

        // Nothing changed yet.
        watcher.inner.watch_step().await;
        assert!(drain(&mut rx).is_empty());

        wall.publish(61);
        wall.pin(Some(99));
        watcher.inner.watch_step().await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                WatchEvent::PinnedPostChanged {
                    owner_id: -7,
                    post_id: Some(99)
                },
                WatchEvent::NewPosts {
                    owner_id: -7,
                    posts: vec![post(61)],
                },
            ]
        );
        assert_eq!(watcher.fixed_post_id().await, Some(99));
        assert_eq!(watcher.last_post_id().await, 61);

        watcher.inner.watch_step().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unpin_reports_none() {
        let wall = FakeWall::with_range(60, 1);
        wall.pin(Some(42));
        let (wall, dispatcher, watcher) = watcher(wall);
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 60, 42).await;

        wall.pin(None);
        watcher.inner.watch_step().await;
        assert_eq!(
            drain(&mut rx),
            vec![WatchEvent::PinnedPostChanged {
                owner_id: -7,
                post_id: None
            }]
        );
        assert_eq!(watcher.fixed_post_id().await, None);
    }

    #[tokio::test]
    async fn test_unpinned_newest_post_is_detected_and_delivered() {
        let wall = FakeWall::with_range(50, 1);
        wall.pin(Some(51));
        let (wall, dispatcher, watcher) = watcher(wall);
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 50, -1).await;

        watcher.inner.watch_step().await;
        assert_eq!(
            drain(&mut rx),
            vec![WatchEvent::PinnedPostChanged {
                owner_id: -7,
                post_id: Some(51)
            }]
        );

        // The pinned post drops back into its chronological place.
        wall.pin(None);
        wall.publish(51);
        watcher.inner.watch_step().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            WatchEvent::PinnedPostChanged {
                owner_id: -7,
                post_id: None
            }
        );
        match &events[1] {
            WatchEvent::NewPosts { posts, .. } => assert_eq!(ids(posts), vec![51]),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_tick_without_seed_loads_whole_wall() {
        let (wall, _dispatcher, watcher) = watcher(FakeWall::with_range(250, 1));
        arm(&watcher, -1, -1).await;

        watcher.inner.watch_step().await;
        // Probe of 10, then full pages of 100.
        assert_eq!(
            *wall.requests.lock().unwrap(),
            vec![(0, 10), (10, 100), (110, 100), (210, 100)]
        );
        assert_eq!(watcher.last_post_id().await, 250);
    }

    #[tokio::test]
    async fn test_sleep_steps_follow_new_posts() {
        let (wall, _dispatcher, watcher) = watcher(FakeWall::with_range(30, 1));
        arm(&watcher, 20, -1).await;

        let mut delays = Vec::new();
        for _ in 0..4 {
            delays.push(watcher.inner.watch_step().await);
        }
        assert_eq!(delays, vec![ms(5000), ms(10000), ms(15000), ms(15000)]);

        wall.publish(31);
        assert_eq!(watcher.inner.watch_step().await, ms(5000));
    }

    #[tokio::test]
    async fn test_batch_mode_emits_one_event_per_tick() {
        let options = WallWatchOptions {
            inform_immediately: false,
            probe_load_count: 5,
            max_load_count: 5,
            ..Default::default()
        };
        let (_wall, dispatcher, watcher) = watcher_with(FakeWall::with_range(40, 1), options);
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 28, -1).await;

        watcher.inner.watch_step().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            WatchEvent::NewPosts { posts, .. } => {
                assert_eq!(ids(posts), (29..=40).rev().collect::<Vec<_>>());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_immediate_mode_emits_per_page() {
        let options = WallWatchOptions {
            probe_load_count: 5,
            max_load_count: 5,
            ..Default::default()
        };
        let (_wall, dispatcher, watcher) = watcher_with(FakeWall::with_range(40, 1), options);
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 28, -1).await;

        watcher.inner.watch_step().await;
        let slices: Vec<Vec<i64>> = drain(&mut rx)
            .iter()
            .map(|event| match event {
                WatchEvent::NewPosts { posts, .. } => ids(posts),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            slices,
            vec![vec![40, 39, 38, 37, 36], vec![35, 34, 33, 32, 31], vec![30, 29]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_the_step() {
        let (wall, _dispatcher, watcher) = watcher(FakeWall::with_range(30, 1));
        arm(&watcher, 30, -1).await;

        assert_eq!(watcher.inner.watch_step().await, ms(10000));
        wall.fail_next(5);
        assert_eq!(watcher.inner.watch_step().await, ms(10000));
        assert_eq!(watcher.last_post_id().await, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deep_page_does_not_skip_posts() {
        let options = WallWatchOptions {
            inform_immediately: false,
            ..Default::default()
        };
        let (wall, dispatcher, watcher) = watcher_with(FakeWall::with_range(150, 1), options);
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 20, -1).await;

        // The first small page loads, every page behind it fails.
        wall.fail_pages_from(Some(1));
        watcher.inner.watch_step().await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(watcher.last_post_id().await, 20);

        wall.fail_pages_from(None);
        watcher.inner.watch_step().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            WatchEvent::NewPosts { posts, .. } => {
                assert_eq!(posts.len(), 130);
                assert_eq!(ids(posts), (21..=150).rev().collect::<Vec<_>>());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(watcher.last_post_id().await, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_in_immediate_mode_redelivers_instead_of_skipping() {
        let (wall, dispatcher, watcher) = watcher(FakeWall::with_range(150, 1));
        let mut rx = dispatcher.subscribe("test");
        arm(&watcher, 20, -1).await;

        wall.fail_pages_from(Some(1));
        watcher.inner.watch_step().await;
        let slices: Vec<Vec<i64>> = drain(&mut rx)
            .iter()
            .map(|event| match event {
                WatchEvent::NewPosts { posts, .. } => ids(posts),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(slices, vec![(141..=150).rev().collect::<Vec<_>>()]);
        assert_eq!(watcher.last_post_id().await, 20);

        wall.fail_pages_from(None);
        watcher.inner.watch_step().await;
        let delivered: Vec<i64> = drain(&mut rx)
            .iter()
            .flat_map(|event| match event {
                WatchEvent::NewPosts { posts, .. } => ids(posts),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(delivered, (21..=150).rev().collect::<Vec<_>>());
        assert_eq!(watcher.last_post_id().await, 150);
    }

    #[tokio::test]
    async fn test_load_posts_keeps_the_watermark() {
        let (_wall, _dispatcher, watcher) = watcher(FakeWall::with_range(30, 1));
        arm(&watcher, 10, -1).await;

        watcher.load_posts(LoadParams::last(5), false).await.unwrap();
        assert_eq!(watcher.last_post_id().await, 10);
    }

    #[tokio::test]
    async fn test_load_posts_reports_loaded_posts() {
        let (_wall, dispatcher, watcher) = watcher(FakeWall::with_range(30, 1));
        let mut rx = dispatcher.subscribe("test");

        let posts = watcher.load_posts(LoadParams::last(5), true).await.unwrap();
        assert_eq!(ids(&posts), vec![30, 29, 28, 27, 26]);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![WatchEvent::LoadedPosts {
                owner_id: -7,
                posts: posts.clone()
            }]
        );

        let quiet = watcher.load_posts(LoadParams::last(3), false).await.unwrap();
        assert_eq!(quiet.len(), 3);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_delivers_new_posts_until_stopped() {
        let (wall, dispatcher, watcher) = watcher(FakeWall::with_range(20, 1));
        let mut rx = dispatcher.subscribe("test");

        watcher
            .start(StartWallWatch {
                last_post_id: Some(20),
                fixed_post_id: None,
            })
            .await;
        assert_eq!(watcher.state(), WatcherState::Active);

        tokio::time::sleep(Duration::from_secs(1)).await;
        wall.publish(21);
        let event = rx.recv().await.unwrap();
        match &*event {
            WatchEvent::NewPosts { owner_id, posts } => {
                assert_eq!(*owner_id, -7);
                assert_eq!(ids(posts), vec![21]);
            }
            other => panic!("unexpected event {other:?}"),
        }

        watcher.stop();
        assert_eq!(watcher.state(), WatcherState::Suspended);
        let calls = wall.request_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(wall.request_count(), calls);
        assert_eq!(watcher.last_post_id().await, 21);
    }
}
