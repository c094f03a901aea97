//! Logs every event the watchers publish.

use std::sync::Arc;

use lib_watch::WatchEvent;
use tokio::sync::mpsc::UnboundedReceiver;

/// One line per event, suitable for the log file.
pub fn describe(event: &WatchEvent) -> String {
    match event {
        WatchEvent::NewMessages { target, messages } => {
            let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
            format!("{} new message(s) for {}: [{}]", messages.len(), target, ids.join(", "))
        }
        WatchEvent::NewEvents { target, history } => format!(
            "{} long poll event(s) for {}, new pts {}",
            history.history.len(),
            target,
            history.new_pts
        ),
        WatchEvent::NewPosts { owner_id, posts } => {
            let ids: Vec<String> = posts.iter().map(|p| p.id.to_string()).collect();
            format!("{} new post(s) on wall {}: [{}]", posts.len(), owner_id, ids.join(", "))
        }
        WatchEvent::PinnedPostChanged { owner_id, post_id } => match post_id {
            Some(id) => format!("Wall {} pinned post {}", owner_id, id),
            None => format!("Wall {} has no pinned post anymore", owner_id),
        },
        WatchEvent::LoadedPosts { owner_id, posts } => {
            format!("{} post(s) loaded from wall {}", posts.len(), owner_id)
        }
    }
}

/// Drains `events` until the dispatcher drops the subscription.
pub async fn run(mut events: UnboundedReceiver<Arc<WatchEvent>>) {
    while let Some(event) = events.recv().await {
        match &*event {
            WatchEvent::NewEvents { .. } => log::debug!("{}", describe(&event)),
            _ => log::info!("{}", describe(&event)),
        }
    }
    log::info!("Event subscription closed.");
}
