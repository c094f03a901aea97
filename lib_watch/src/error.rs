//! # Watch Errors
//!
//! Failures raised by the engine itself. Remote failures arrive as
//! [`ApiError`](crate::remote::ApiError) and are folded into these once the
//! retry policy gives up on them.

use thiserror::Error;

/// Errors surfaced by retry policies, fetchers and watchers.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Every allowed attempt of a remote call failed.
    #[error("{operation} failed after all retries:\n{log}")]
    ExhaustedRetries {
        /// Name of the remote operation.
        operation: String,
        /// One line per failed attempt, `"<attempt> - <message>"`.
        log: String,
    },

    /// The long-poll handshake failed while starting a watcher.
    #[error("long poll handshake failed for {target}: {source}")]
    Handshake {
        /// Descriptor of the watched account.
        target: String,
        /// Underlying failure.
        #[source]
        source: Box<WatchError>,
    },

    /// A wall page could not be loaded.
    #[error("failed to load wall page at offset {offset}: {source}")]
    PageLoad {
        /// Offset of the page that failed.
        offset: u32,
        /// Underlying failure.
        #[source]
        source: Box<WatchError>,
    },

    /// The remote side answered with something that cannot be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The credential was rejected and could not be refreshed.
    #[error("authorization failed: {0}")]
    AuthFailed(String),
}
