//! # Watch Event Dispatcher
//!
//! Fans every event a watcher observes out to all registered subscribers.
//!
//! ## Design:
//!
//! 1.  **Shared Fan-out**: an event is wrapped in an `Arc` once; each
//!     subscriber receives a clone of the pointer, not of the batch.
//!
//! 2.  **Channel per Subscriber**: every subscriber owns the receiving half of
//!     an unbounded MPSC channel, so a slow consumer never stalls a watcher
//!     tick.
//!
//! 3.  **Lazy Cleanup**: subscribers whose receiver was dropped are removed on
//!     the next publish.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::model::{LongPollHistory, Message, WallPost};

/// Everything a watcher can tell its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// New direct messages of an account.
    NewMessages {
        target: String,
        messages: Vec<Message>,
    },
    /// The raw history batch the messages were taken from.
    NewEvents {
        target: String,
        history: LongPollHistory,
    },
    /// New posts on a watched wall.
    NewPosts { owner_id: i64, posts: Vec<WallPost> },
    /// The pinned post of a wall changed; `None` when nothing is pinned anymore.
    PinnedPostChanged { owner_id: i64, post_id: Option<i64> },
    /// Posts returned by an ad-hoc load outside the watch loop.
    LoadedPosts { owner_id: i64, posts: Vec<WallPost> },
}

struct SubscriberHandle {
    id: String,
    sender: mpsc::UnboundedSender<Arc<WatchEvent>>,
}

#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<Vec<SubscriberHandle>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Subscribe
    ///
    /// Registers a subscriber and returns the receiver all future events
    /// arrive on. Events published before this call are not replayed.
    pub fn subscribe(&self, id: &str) -> mpsc::UnboundedReceiver<Arc<WatchEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers.push(SubscriberHandle {
            id: id.to_string(),
            sender: tx,
        });
        log::info!("Subscriber '{}' registered", id);
        rx
    }

    /// Removes a specific subscriber by its ID.
    pub fn unsubscribe(&self, id: &str) {
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers.retain(|s| s.id != id);
        log::info!("Subscriber '{}' explicitly removed.", id);
    }

    /// # Publish
    ///
    /// Sends `event` to every subscriber and drops the ones that hung up.
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: WatchEvent) -> usize {
        let event = Arc::new(event);
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");

        subscribers.retain(|subscriber| match subscriber.sender.send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(_) => {
                log::info!("Subscriber '{}' disconnected. Removing from dispatcher.", subscriber.id);
                false
            }
        });
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("Dispatcher lock poisoned").len()
    }
}
