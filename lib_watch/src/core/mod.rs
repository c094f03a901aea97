//! # Core Engine Module
//!
//! Building blocks the watchers are assembled from.
//!
//! ## Core Components:
//!
//! - **`retry`**: bounded retry of a single remote call, with the fixed
//!   "too many requests" pause and per-call rate-limit accounting.
//!
//! - **`registry`**: one async mutex per access token, so calls sharing a
//!   credential never overlap while calls under different credentials run in
//!   parallel.
//!
//! - **`dispatcher`**: fan-out of typed watch events to every subscriber
//!   through unbounded channels, with one shared allocation per event.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Fan-out of watch events to subscribers.
pub mod dispatcher;
/// Per-credential lock registry.
pub mod registry;
/// Bounded retry of remote calls.
pub mod retry;

// --- Public API Re-exports ---
pub use dispatcher::{Dispatcher, WatchEvent};
pub use registry::TokenLocks;
pub use retry::{RateLimitAccounting, RetryPolicy};
