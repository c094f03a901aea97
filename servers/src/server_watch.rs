use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

use lib_watch::model::{StartWallWatch, StartWatch};
use lib_watch::remote::VkClient;
use lib_watch::{Dispatcher, LongPollWatcher, TokenLocks, WallWatcher};

mod watch_logic;
use watch_logic::token::ConfigFileRefresher;
use watch_logic::{config, events, logger};

const EVENT_LOG_SUBSCRIBER: &str = "server_watch_log";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_config()?;
    logger::setup_logging(&settings.log)?;
    let watch = &settings.watch;

    let dispatcher = Arc::new(Dispatcher::new());
    let locks = Arc::new(TokenLocks::new());
    let mut client = VkClient::new(&watch.api, locks)?;
    if let Some(path) = &settings.config_file {
        client = client.with_refresher(Arc::new(ConfigFileRefresher::new(path.clone())));
    }
    let client = Arc::new(client);

    let reporter = tokio::spawn(events::run(dispatcher.subscribe(EVENT_LOG_SUBSCRIBER)));

    let message_watcher = if watch.watch_messages {
        let watcher = LongPollWatcher::new(
            Arc::clone(&client),
            watch.long_poll.clone(),
            &watch.retry,
            Arc::clone(&dispatcher),
        );
        watcher.start_watch(StartWatch::default()).await?;
        Some(watcher)
    } else {
        None
    };

    let mut wall_watchers = Vec::with_capacity(watch.walls.len());
    for &owner_id in &watch.walls {
        let watcher = WallWatcher::new(
            Arc::clone(&client),
            owner_id,
            watch.wall.clone(),
            &watch.retry,
            Arc::clone(&dispatcher),
        );
        watcher.start(StartWallWatch::default()).await;
        wall_watchers.push(watcher);
    }

    if message_watcher.is_none() && wall_watchers.is_empty() {
        log::warn!("Nothing to watch: message watcher disabled and no walls configured.");
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::error!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    if let Some(watcher) = &message_watcher {
        watcher.stop_watch();
        let cursor = watcher.cursor().await;
        log::info!("Message stream stopped at ts={:?} pts={:?}", cursor.ts, cursor.pts);
    }
    for watcher in &wall_watchers {
        watcher.stop();
        log::info!(
            "Wall {} stopped at post {}",
            watcher.owner_id(),
            watcher.last_post_id().await
        );
    }

    dispatcher.unsubscribe(EVENT_LOG_SUBSCRIBER);
    let _ = reporter.await;

    log::info!("Shutdown complete.");
    Ok(())
}
