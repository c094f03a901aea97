//! # lib_watch
//!
//! Adaptive polling engine for two independent streams of a social-platform
//! method API: direct-message updates (long poll) and group-wall posts
//! (paginated incremental reads).
//!
//! ## Layout:
//! - **`configs`**: option structs and config file loading.
//! - **`core`**: retry policy, per-token lock registry and the event dispatcher.
//! - **`model`**: cursors, watermarks, posts, messages and request/response types.
//! - **`remote`**: capability traits for the remote API and the HTTP client.
//! - **`watchers`**: the long-poll watcher, the page fetcher and the wall watcher.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Option structs consumed by the watchers and config file loading.
pub mod configs;
/// Retry policy, token lock registry and event dispatcher.
pub mod core;
/// Engine-level error type.
pub mod error;
/// Data model shared between watchers and remote clients.
pub mod model;
/// Remote API capability traits and implementations.
pub mod remote;
/// Long-poll and wall watchers.
pub mod watchers;

// --- Public API Re-exports ---
pub use configs::{LongPollOptions, RetryOptions, WallWatchOptions, WatchConfig};
pub use crate::core::{Dispatcher, RetryPolicy, TokenLocks, WatchEvent};
pub use error::WatchError;
pub use model::{Cursor, LoadParams, Message, WallPost, WallWatermark, WatcherState};
pub use remote::{ApiError, LongPollApi, WallApi};
pub use watchers::{LongPollWatcher, PageFetcher, SleepStep, WallWatcher};
