//! # Token Lock Registry
//!
//! One async mutex per access token. Clients hold the guard for the duration
//! of a remote call, so two calls under the same credential never overlap
//! while calls under different credentials proceed in parallel.
//!
//! Locks are created lazily and live until the credential is invalidated
//! (e.g. after a token refresh).
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct TokenLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TokenLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock of `token`, creating it on first use.
    pub fn lock_for(&self, token: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("TokenLocks lock poisoned");
        let entry = locks.entry(token.to_string()).or_insert_with(|| {
            log::debug!("Creating call lock for a new token");
            Arc::new(AsyncMutex::new(()))
        });
        Arc::clone(entry)
    }

    /// Waits until no other call holds `token`, then holds it until the guard drops.
    pub async fn acquire(&self, token: &str) -> OwnedMutexGuard<()> {
        self.lock_for(token).lock_owned().await
    }

    /// Forgets the lock of a credential that is no longer valid.
    ///
    /// Calls already holding the old lock finish undisturbed.
    pub fn invalidate(&self, token: &str) -> bool {
        let mut locks = self.locks.lock().expect("TokenLocks lock poisoned");
        let removed = locks.remove(token).is_some();
        if removed {
            log::info!("Call lock dropped for an invalidated token");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.locks.lock().expect("TokenLocks lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
