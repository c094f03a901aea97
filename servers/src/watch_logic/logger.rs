//! Console and file logging of the watch server.
//!
//! Every run writes `<prefix>_<timestamp>.log`. At start-up older files with
//! the same prefix are pruned, so several servers can share one directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// Logs of earlier runs kept next to the new one.
const KEEP_PREVIOUS_LOGS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub level: String,
    pub file_prefix: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            level: "info".to_string(),
            file_prefix: "server_watch".to_string(),
        }
    }
}

pub fn setup_logging(settings: &LogSettings) -> Result<()> {
    fs::create_dir_all(&settings.dir)
        .with_context(|| format!("Cannot create log directory {}", settings.dir.display()))?;
    prune_logs(&settings.dir, &settings.file_prefix, KEEP_PREVIOUS_LOGS)?;

    let log_path = settings
        .dir
        .join(log_file_name(&settings.file_prefix, Local::now()));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_filter(&settings.level))
        // HTTP internals stay quiet unless something goes wrong
        .level_for("hyper_util", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    log::info!("Logging to {}", log_path.display());
    Ok(())
}

fn log_file_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}_{}.log", prefix, now.format("%Y-%m-%d_%H-%M-%S"))
}

fn level_filter(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Deletes all but the `keep` newest `<prefix>_*.log` files in `log_dir`.
fn prune_logs(log_dir: &Path, prefix: &str, keep: usize) -> Result<()> {
    let owned = format!("{}_", prefix);
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&owned) && name.ends_with(".log")
        })
        .collect();

    // Newest first; entries without a readable mtime sort last
    entries.sort_by_cached_key(|e| std::cmp::Reverse(e.metadata().and_then(|m| m.modified()).ok()));

    for entry in entries.iter().skip(keep) {
        if let Err(e) = fs::remove_file(entry.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}
