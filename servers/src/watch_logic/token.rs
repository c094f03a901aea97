//! Access token refresh from the JSON configuration file.
//!
//! When the API rejects the token, the file is read again and its
//! `api.accessToken` is used if an operator has put a different one there.

use std::path::PathBuf;

use async_trait::async_trait;
use lib_watch::configs::load_from_path;
use lib_watch::remote::TokenRefresher;
use lib_watch::ApiError;

pub struct ConfigFileRefresher {
    path: PathBuf,
}

impl ConfigFileRefresher {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TokenRefresher for ConfigFileRefresher {
    async fn refresh(&self, expired: &str) -> Result<String, ApiError> {
        let config = load_from_path(&self.path).map_err(|e| {
            ApiError::AuthFailed(format!("reloading {}: {}", self.path.display(), e))
        })?;
        match config.api.access_token {
            Some(token) if !token.is_empty() && token != expired => {
                log::info!("Picked up a new access token from {}", self.path.display());
                Ok(token)
            }
            _ => Err(ApiError::AuthFailed(format!(
                "{} holds no new access token",
                self.path.display()
            ))),
        }
    }
}
