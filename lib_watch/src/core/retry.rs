//! # Retry Policy
//!
//! Wraps one remote call with a bounded number of attempts.
//!
//! A "too many requests" answer pauses for a fixed delay before the next
//! attempt. Whether that pause also consumes an attempt depends on the call:
//! handshake and wall page loads count it, history loads do not (they are
//! bounded separately by `max_rate_limit_waits`). Malformed answers and
//! rejected credentials are never retried.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::configs::RetryOptions;
use crate::error::WatchError;
use crate::remote::ApiError;

/// How a rate-limited attempt is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAccounting {
    /// The attempt counts toward `max_attempts`.
    CountsAsAttempt,
    /// The attempt is free; only `max_rate_limit_waits` bounds it.
    Free,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    too_many_requests_delay: Duration,
    max_rate_limit_waits: u32,
    accounting: RateLimitAccounting,
}

impl RetryPolicy {
    pub fn new(options: &RetryOptions, accounting: RateLimitAccounting) -> Self {
        Self {
            max_attempts: options.max_attempts.max(1),
            too_many_requests_delay: options.too_many_requests_delay(),
            max_rate_limit_waits: options.max_rate_limit_waits,
            accounting,
        }
    }

    /// Policy for handshakes and wall pages.
    pub fn counted(options: &RetryOptions) -> Self {
        Self::new(options, RateLimitAccounting::CountsAsAttempt)
    }

    /// Policy for long poll history loads.
    pub fn free_rate_limit(options: &RetryOptions) -> Self {
        Self::new(options, RateLimitAccounting::Free)
    }

    /// Runs `call` until it succeeds or the attempt budget is spent.
    ///
    /// # Errors
    /// - `WatchError::MalformedResponse` as soon as the call reports one.
    /// - `WatchError::AuthFailed` as soon as the credential is rejected.
    /// - `WatchError::ExhaustedRetries` carrying one log line per failed attempt.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, WatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 0;
        let mut rate_limit_waits: u32 = 0;
        let mut error_log = String::new();

        while attempt < self.max_attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(ApiError::RateLimited) => {
                    rate_limit_waits += 1;
                    match self.accounting {
                        RateLimitAccounting::CountsAsAttempt => {
                            attempt += 1;
                            error_log.push_str(&format!("{} - too many requests\n", attempt));
                            if attempt >= self.max_attempts {
                                break;
                            }
                        }
                        RateLimitAccounting::Free => {
                            if rate_limit_waits > self.max_rate_limit_waits {
                                error_log.push_str(&format!(
                                    "{} - too many requests ({} waits)\n",
                                    attempt + 1,
                                    rate_limit_waits - 1
                                ));
                                break;
                            }
                        }
                    }
                    log::debug!(
                        "{} rate limited, waiting {} ms",
                        operation,
                        self.too_many_requests_delay.as_millis()
                    );
                    sleep(self.too_many_requests_delay).await;
                }
                Err(ApiError::Malformed(detail)) => {
                    log::error!("{} returned a malformed response: {}", operation, detail);
                    return Err(WatchError::MalformedResponse(detail));
                }
                Err(ApiError::AuthFailed(detail)) => {
                    log::error!("{} was refused: {}", operation, detail);
                    return Err(WatchError::AuthFailed(detail));
                }
                Err(ApiError::Transient(message)) => {
                    attempt += 1;
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation,
                        attempt,
                        self.max_attempts,
                        message
                    );
                    error_log.push_str(&format!("{} - {}\n", attempt, message));
                }
            }
        }

        Err(WatchError::ExhaustedRetries {
            operation: operation.to_string(),
            log: error_log,
        })
    }
}
