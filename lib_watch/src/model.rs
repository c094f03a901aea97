//! # Data Model
//!
//! Types shared by the watchers and the remote clients: stream cursors, wall
//! watermarks, posts, messages and the request/response shapes of the
//! long-poll methods.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// # Cursor
///
/// Resumption tokens of the message stream. `ts` is handed out by the
/// handshake; `pts` is the position in the durable event log and never moves
/// backwards once set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub ts: Option<u64>,
    pub pts: Option<u64>,
}

impl Cursor {
    /// Moves `pts` forward. Returns `true` when the stored value changed.
    pub fn advance_pts(&mut self, new_pts: u64) -> bool {
        match self.pts {
            Some(current) if new_pts <= current => false,
            _ => {
                self.pts = Some(new_pts);
                true
            }
        }
    }
}

/// Lifecycle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Never started, or the last start failed before the handshake completed.
    Idle,
    /// Handshake succeeded, the loop is not scheduled.
    Enabled,
    /// The loop is scheduled.
    Active,
    /// Stopped after a successful start; can resume without a handshake.
    Suspended,
}

impl WatcherState {
    /// Derives the state from the `enabled`/`active` flags.
    pub fn from_flags(enabled: bool, active: bool, ever_stopped: bool) -> Self {
        match (enabled, active) {
            (_, true) => WatcherState::Active,
            (true, false) if ever_stopped => WatcherState::Suspended,
            (true, false) => WatcherState::Enabled,
            (false, false) => WatcherState::Idle,
        }
    }
}

/// # Wall Watermark
///
/// What a wall watcher has already delivered. `last_seen_id` ignores the
/// pinned post and only grows; `fixed_post_id` is `-1` when nothing is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallWatermark {
    pub last_seen_id: i64,
    pub fixed_post_id: i64,
}

impl Default for WallWatermark {
    fn default() -> Self {
        Self {
            last_seen_id: -1,
            fixed_post_id: -1,
        }
    }
}

impl WallWatermark {
    pub fn pinned(&self) -> Option<i64> {
        (self.fixed_post_id >= 0).then_some(self.fixed_post_id)
    }

    /// Raises `last_seen_id` to `id` if it is newer.
    pub fn observe(&mut self, id: i64) {
        if id > self.last_seen_id {
            self.last_seen_id = id;
        }
    }
}

/// A post on a wall, as returned by one page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallPost {
    pub id: i64,
    pub owner_id: i64,
    pub from_id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub text: String,
}

impl WallPost {
    /// Bare post with just the fields the fetcher looks at.
    pub fn new(id: i64, date: DateTime<Utc>, is_pinned: bool) -> Self {
        Self {
            id,
            owner_id: 0,
            from_id: 0,
            date,
            is_pinned,
            text: String::new(),
        }
    }
}

/// A direct message carried by a history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(default)]
    pub peer_id: i64,
    #[serde(default)]
    pub from_id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub out: bool,
}

/// Answer of the long-poll handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongPollServer {
    pub key: String,
    pub server: String,
    /// Kept textual until the watcher parses it.
    pub ts: String,
    pub pts: Option<u64>,
}

/// Parameters of one incremental history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub ts: u64,
    pub pts: Option<u64>,
    pub preview_length: Option<u32>,
    pub onlines: bool,
    pub fields: Vec<String>,
    pub lp_version: u32,
}

/// Answer of one incremental history fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LongPollHistory {
    pub new_pts: u64,
    /// Raw event arrays, in server order.
    pub history: Vec<serde_json::Value>,
    pub messages: Vec<Message>,
    pub unread_messages: u32,
}

impl LongPollHistory {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Caller-supplied cursor for resuming a message stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWatch {
    pub ts: Option<u64>,
    pub pts: Option<u64>,
}

/// Caller-supplied watermark for resuming a wall watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWallWatch {
    /// Newest post already delivered; everything on the wall is loaded when unset.
    pub last_post_id: Option<i64>,
    pub fixed_post_id: Option<i64>,
}

/// # Load Parameters
///
/// Where a paginated wall read starts and the three independent conditions
/// that end it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadParams {
    pub offset: Option<u32>,
    pub max_item_count: Option<usize>,
    /// Oldest date still loaded (inclusive).
    pub last_date_to_load: Option<DateTime<Utc>>,
    /// Smallest id still loaded (inclusive).
    pub last_item_id_to_load: Option<i64>,
}

impl LoadParams {
    /// The whole wall.
    pub fn all() -> Self {
        Self::default()
    }

    /// Posts published since local midnight.
    pub fn today() -> Self {
        let midnight = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc));
        Self {
            last_date_to_load: midnight,
            ..Self::default()
        }
    }

    /// The newest `count` posts.
    pub fn last(count: usize) -> Self {
        Self {
            max_item_count: Some(count),
            ..Self::default()
        }
    }

    /// Everything newer than `last_seen_id`.
    pub fn newer_than(last_seen_id: i64) -> Self {
        Self {
            last_item_id_to_load: Some(last_seen_id.saturating_add(1)),
            ..Self::default()
        }
    }
}
