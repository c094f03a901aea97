//! # Remote API Module
//!
//! Capability traits the watchers call, and the error taxonomy every
//! implementation must report.
//!
//! ## Contained Modules:
//! - **`vk_http`**: a `reqwest` client for the platform's `/method/` endpoint
//!   that serializes calls per access token.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{HistoryRequest, LongPollHistory, LongPollServer, WallPost};

/// HTTP client for the platform's method API.
#[cfg(feature = "remote-http")]
pub mod vk_http;

#[cfg(feature = "remote-http")]
pub use vk_http::{TokenRefresher, VkClient};

/// Failures a remote call can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The server asked us to slow down.
    #[error("too many requests")]
    RateLimited,
    /// Any other failure worth retrying.
    #[error("{0}")]
    Transient(String),
    /// The answer could not be interpreted; retrying will not help.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The access token was rejected.
    #[error("authorization failed: {0}")]
    AuthFailed(String),
}

/// Message stream capabilities.
#[async_trait]
pub trait LongPollApi: Send + Sync {
    /// Human readable owner of the credential, used in log lines.
    fn target(&self) -> String;

    /// Handshake: asks for a fresh server and `ts`; `need_pts` requests a `pts` too.
    async fn get_long_poll_server(
        &self,
        need_pts: bool,
        lp_version: u32,
    ) -> Result<LongPollServer, ApiError>;

    /// Incremental fetch of everything after the request's `ts`/`pts`.
    async fn get_long_poll_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<LongPollHistory, ApiError>;
}

/// Wall capabilities.
#[async_trait]
pub trait WallApi: Send + Sync {
    /// One page of posts, newest first.
    async fn get_wall(&self, owner_id: i64, offset: u32, count: u32)
        -> Result<Vec<WallPost>, ApiError>;
}
