//! # Configuration Module
//!
//! Option structs consumed by the watchers, plus loading of the grouped
//! [`WatchConfig`] from a JSON file.
//!
//! Every field carries a serde default, so a config file only has to name the
//! values it wants to change.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Option structs and their defaults.
pub mod options;

pub use options::{
    load_from_path, ApiOptions, ConfigError, LongPollOptions, RetryOptions, WallWatchOptions,
    WatchConfig,
};
