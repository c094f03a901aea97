//! # Page Fetcher
//!
//! One paginated read of a wall, newest posts first, until any of the stop
//! conditions in [`LoadParams`] is met.
//!
//! ## Workflow:
//! 1.  Fetch a page at `(offset, size)` through the retry policy.
//! 2.  Hand the raw page to the sink (pinned-post tracking lives there).
//! 3.  Filter the page against the threshold carried over from the previous
//!     page and the date/id bounds, hand the surviving slice to the sink and
//!     collect it.
//! 4.  The id of the oldest raw post becomes the next threshold; anything at
//!     or above it was already seen, even if new posts shifted the window.
//! 5.  Continue while the page was full and no stop condition has been hit.

use chrono::{DateTime, Utc};

use crate::configs::options::MAX_PAGE_SIZE;
use crate::core::RetryPolicy;
use crate::error::WatchError;
use crate::model::{LoadParams, WallPost};
use crate::remote::WallApi;

/// Observer of a paginated read.
pub trait PageSink {
    /// Every raw page as it arrives, including empty ones.
    fn on_page(&mut self, _offset: u32, _page: &[WallPost]) {}

    /// The non-empty filtered part of each page.
    fn on_slice(&mut self, _slice: &[WallPost]) {}
}

/// Sink that ignores everything.
pub struct NoopSink;

impl PageSink for NoopSink {}

/// Selects the posts of one raw page that satisfy the load conditions.
///
/// - a pinned post at index 0 is skipped;
/// - posts with `id >= threshold_id` were delivered with an earlier page;
/// - posts older than `last_date_to_load` are trimmed from the end;
/// - posts with `id < last_item_id_to_load` are trimmed from the end (only
///   when the bound is positive).
pub fn filter_page(
    page: &[WallPost],
    threshold_id: i64,
    last_date_to_load: Option<DateTime<Utc>>,
    last_item_id_to_load: Option<i64>,
) -> &[WallPost] {
    let mut start = 0;
    let mut end = page.len();

    if page.first().is_some_and(|post| post.is_pinned) {
        start += 1;
    }

    while start < end && page[start].id >= threshold_id {
        start += 1;
    }

    if let Some(last_date) = last_date_to_load {
        while end > start && page[end - 1].date < last_date {
            end -= 1;
        }
    }

    if let Some(last_id) = last_item_id_to_load.filter(|id| *id > 0) {
        while end > start && page[end - 1].id < last_id {
            end -= 1;
        }
    }

    &page[start..end]
}

pub struct PageFetcher<'a, A: WallApi + ?Sized> {
    api: &'a A,
    retry: &'a RetryPolicy,
    page_size: u32,
    first_page_size: Option<u32>,
}

impl<'a, A: WallApi + ?Sized> PageFetcher<'a, A> {
    /// `page_size` is clamped to `1..=100`.
    pub fn new(api: &'a A, retry: &'a RetryPolicy, page_size: u32) -> Self {
        Self {
            api,
            retry,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            first_page_size: None,
        }
    }

    /// Uses a smaller first page, keeping ticks with nothing new cheap.
    pub fn with_probe(mut self, probe_size: u32) -> Self {
        self.first_page_size = Some(probe_size.clamp(1, self.page_size));
        self
    }

    /// Loads posts of `owner_id` until a stop condition in `params` is met.
    ///
    /// # Errors
    /// `WatchError::PageLoad` when a page cannot be loaded within the retry budget.
    pub async fn fetch<S>(
        &self,
        owner_id: i64,
        params: &LoadParams,
        sink: &mut S,
    ) -> Result<Vec<WallPost>, WatchError>
    where
        S: PageSink + ?Sized,
    {
        let mut posts: Vec<WallPost> = Vec::new();
        let mut offset = params.offset.unwrap_or(0);
        let mut size = self.first_page_size.unwrap_or(self.page_size);
        let mut threshold_id = i64::MAX;

        loop {
            let page = self
                .retry
                .execute("wall.get", || self.api.get_wall(owner_id, offset, size))
                .await
                .map_err(|source| WatchError::PageLoad {
                    offset,
                    source: Box::new(source),
                })?;
            log::trace!(
                "wall {} page at offset {} returned {} posts",
                owner_id,
                offset,
                page.len()
            );

            sink.on_page(offset, &page);

            let Some(oldest) = page.last() else {
                break;
            };

            let mut slice = filter_page(
                &page,
                threshold_id,
                params.last_date_to_load,
                params.last_item_id_to_load,
            );
            if let Some(max) = params.max_item_count {
                let room = max.saturating_sub(posts.len());
                slice = &slice[..slice.len().min(room)];
            }
            if !slice.is_empty() {
                sink.on_slice(slice);
                posts.extend_from_slice(slice);
            }

            threshold_id = oldest.id;
            let oldest_date = oldest.date;
            let full_page = page.len() == size as usize;
            offset = offset.saturating_add(size);

            let more = full_page
                && params
                    .last_item_id_to_load
                    .map_or(true, |last_id| threshold_id > last_id)
                && params.max_item_count.map_or(true, |max| posts.len() < max)
                && params
                    .last_date_to_load
                    .map_or(true, |last_date| oldest_date > last_date);
            if !more {
                break;
            }
            size = self.page_size;
        }

        Ok(posts)
    }
}
