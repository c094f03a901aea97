//! # VK Method Client
//!
//! Asynchronous client for the `/method/<name>` endpoint built on `reqwest`.
//!
//! Every call is sent as a form POST carrying the access token and API
//! version. The JSON envelope is unwrapped here: `{"response": ...}` becomes
//! the typed value, `{"error": {...}}` is mapped onto [`ApiError`] (code 6,
//! "too many requests per second", becomes [`ApiError::RateLimited`]).
//! Retrying is left to the caller's retry policy.
//!
//! A rejected token (code 5) is handed to the [`TokenRefresher`], if one is
//! installed. The call is repeated once with the fresh token.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{ApiError, LongPollApi, WallApi};
use crate::configs::{ApiOptions, ConfigError};
use crate::core::TokenLocks;
use crate::model::{HistoryRequest, LongPollHistory, LongPollServer, Message, WallPost};

/// Error code of "user authorization failed".
const AUTHORIZATION_FAILED: i64 = 5;
/// Error code of "too many requests per second".
const TOO_MANY_REQUESTS: i64 = 6;

/// Supplies a new access token once the current one is rejected.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Returns the token to use instead of `expired`.
    async fn refresh(&self, expired: &str) -> Result<String, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: Option<Value>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct RawServer {
    key: String,
    server: String,
    ts: Value,
    pts: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawHistory {
    #[serde(default)]
    history: Vec<Value>,
    #[serde(default)]
    messages: Items<RawMessage>,
    #[serde(default)]
    new_pts: u64,
    #[serde(default)]
    unread_messages: u32,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: i64,
    #[serde(default)]
    peer_id: i64,
    #[serde(default)]
    from_id: i64,
    date: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    out: Value,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: i64,
    #[serde(default)]
    owner_id: i64,
    #[serde(default)]
    from_id: i64,
    date: i64,
    #[serde(default)]
    is_pinned: Value,
    #[serde(default)]
    text: String,
}

/// VK flags arrive as `0`/`1`, occasionally as booleans.
fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn unix_date(seconds: i64) -> Result<DateTime<Utc>, ApiError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ApiError::Malformed(format!("date {} out of range", seconds)))
}

/// The `ts` token is a number in some API versions and a string in others.
fn ts_text(ts: Value) -> String {
    match ts {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

pub struct VkClient {
    inner: reqwest::Client,
    base_url: Url,
    api_version: String,
    user_id: Option<i64>,
    access_token: Mutex<String>,
    locks: Arc<TokenLocks>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl VkClient {
    /// Creates a client from `options`, sharing `locks` with every other
    /// client of the process.
    ///
    /// # Errors
    /// `ConfigError::Invalid` for a missing token, a relative base URL or a
    /// client that cannot be built.
    pub fn new(options: &ApiOptions, locks: Arc<TokenLocks>) -> Result<Self, ConfigError> {
        let access_token = options
            .access_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConfigError::Invalid("api.accessToken is required".into()))?;

        let mut base = options.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ConfigError::Invalid(format!("api.baseUrl '{}': {}", options.base_url, e)))?;

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {}", e)))?;

        Ok(Self {
            inner,
            base_url,
            api_version: options.api_version.clone(),
            user_id: options.user_id,
            access_token: Mutex::new(access_token),
            locks,
            refresher: None,
        })
    }

    /// Installs `refresher`, consulted when the API rejects the token.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    fn current_token(&self) -> String {
        self.access_token
            .lock()
            .expect("Access token lock poisoned")
            .clone()
    }

    /// Swaps in a refreshed access token and forgets the call lock of the old one.
    pub fn replace_token(&self, token: String) {
        let old = {
            let mut current = self.access_token.lock().expect("Access token lock poisoned");
            std::mem::replace(&mut *current, token)
        };
        self.locks.invalidate(&old);
        log::info!("Access token replaced for {}", self.target());
    }

    /// # Call
    ///
    /// Invokes `method` with `params` while holding the call lock of the
    /// current token, then decodes the `response` member into `T`. A rejected
    /// token is refreshed and the call repeated once.
    pub async fn call<T>(&self, method: &str, params: &[(&str, String)]) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let token = self.current_token();
        match self.call_with(&token, method, params).await {
            Err(ApiError::AuthFailed(detail)) => {
                let fresh = self.refreshed_token(&token, detail).await?;
                self.call_with(&fresh, method, params).await
            }
            other => other,
        }
    }

    async fn refreshed_token(&self, expired: &str, detail: String) -> Result<String, ApiError> {
        // Another call may have refreshed it already.
        let current = self.current_token();
        if current != expired {
            return Ok(current);
        }
        let Some(refresher) = &self.refresher else {
            return Err(ApiError::AuthFailed(detail));
        };

        log::warn!("Access token for {} rejected: {}", self.target(), detail);
        let fresh = refresher.refresh(expired).await?;
        if fresh.is_empty() || fresh == expired {
            return Err(ApiError::AuthFailed(format!("{} (no fresh token)", detail)));
        }
        self.replace_token(fresh.clone());
        Ok(fresh)
    }

    async fn call_with<T>(
        &self,
        token: &str,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(&format!("method/{}", method))
            .map_err(|e| ApiError::Malformed(format!("method url {}: {}", method, e)))?;

        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", token));
        form.push(("v", self.api_version.as_str()));

        let envelope = {
            let _guard = self.locks.acquire(token).await;
            log::trace!("Calling {}", method);
            let response = self
                .inner
                .post(url)
                .form(&form)
                .send()
                .await
                .map_err(|e| ApiError::Transient(format!("{}: {}", method, e)))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ApiError::RateLimited);
            }
            if !status.is_success() {
                return Err(ApiError::Transient(format!("{}: HTTP {}", method, status)));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| ApiError::Transient(format!("{}: reading body: {}", method, e)))?;
            serde_json::from_slice::<Envelope>(&body)
                .map_err(|e| ApiError::Malformed(format!("{}: {}", method, e)))?
        };

        if let Some(error) = envelope.error {
            let detail = format!("{}: error {}: {}", method, error.error_code, error.error_msg);
            return Err(match error.error_code {
                TOO_MANY_REQUESTS => ApiError::RateLimited,
                AUTHORIZATION_FAILED => ApiError::AuthFailed(detail),
                _ => ApiError::Transient(detail),
            });
        }
        let response = envelope
            .response
            .ok_or_else(|| ApiError::Malformed(format!("{}: neither response nor error", method)))?;
        serde_json::from_value(response).map_err(|e| ApiError::Malformed(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl LongPollApi for VkClient {
    fn target(&self) -> String {
        match self.user_id {
            Some(id) => format!("user {}", id),
            None => "current user".to_string(),
        }
    }

    async fn get_long_poll_server(
        &self,
        need_pts: bool,
        lp_version: u32,
    ) -> Result<LongPollServer, ApiError> {
        let params = [
            ("need_pts", u8::from(need_pts).to_string()),
            ("lp_version", lp_version.to_string()),
        ];
        let raw: RawServer = self.call("messages.getLongPollServer", &params).await?;
        Ok(LongPollServer {
            key: raw.key,
            server: raw.server,
            ts: ts_text(raw.ts),
            pts: raw.pts,
        })
    }

    async fn get_long_poll_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<LongPollHistory, ApiError> {
        let mut params = vec![
            ("ts", request.ts.to_string()),
            ("onlines", u8::from(request.onlines).to_string()),
            ("lp_version", request.lp_version.to_string()),
        ];
        if let Some(pts) = request.pts {
            params.push(("pts", pts.to_string()));
        }
        if let Some(length) = request.preview_length {
            params.push(("preview_length", length.to_string()));
        }
        if !request.fields.is_empty() {
            params.push(("fields", request.fields.join(",")));
        }

        let raw: RawHistory = self.call("messages.getLongPollHistory", &params).await?;
        let messages = raw
            .messages
            .items
            .into_iter()
            .map(|m| {
                Ok(Message {
                    id: m.id,
                    peer_id: m.peer_id,
                    from_id: m.from_id,
                    date: unix_date(m.date)?,
                    text: m.text,
                    out: flag(&m.out),
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        Ok(LongPollHistory {
            new_pts: raw.new_pts,
            history: raw.history,
            messages,
            unread_messages: raw.unread_messages,
        })
    }
}

#[async_trait]
impl WallApi for VkClient {
    async fn get_wall(
        &self,
        owner_id: i64,
        offset: u32,
        count: u32,
    ) -> Result<Vec<WallPost>, ApiError> {
        let params = [
            ("owner_id", owner_id.to_string()),
            ("offset", offset.to_string()),
            ("count", count.to_string()),
        ];
        let raw: Items<RawPost> = self.call("wall.get", &params).await?;
        raw.items
            .into_iter()
            .map(|p| {
                Ok(WallPost {
                    id: p.id,
                    owner_id: p.owner_id,
                    from_id: p.from_id,
                    date: unix_date(p.date)?,
                    is_pinned: flag(&p.is_pinned),
                    text: p.text,
                })
            })
            .collect()
    }
}
