use anyhow::{Context, Result};
use clap::Parser;
use lib_watch::configs::{load_from_path, WatchConfig};

use super::logger::LogSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Direct message and wall watcher for the VK method API", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "WATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "WATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "WATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "WATCH_LOG_FILE_PREFIX", help = "Name prefix of the log files this process owns.")]
    pub log_file_prefix: Option<String>,

    #[clap(long, env = "VK_ACCESS_TOKEN", help = "Access token used for every API call.")]
    pub access_token: Option<String>,

    #[clap(long, env = "VK_USER_ID", help = "Account the token belongs to, used in log lines.")]
    pub user_id: Option<i64>,

    #[clap(long, env = "VK_API_VERSION", help = "API version sent with every call.")]
    pub api_version: Option<String>,

    #[clap(
        long,
        env = "WATCH_WALLS",
        value_delimiter = ',',
        allow_negative_numbers = true,
        help = "Comma separated wall owner ids; communities are negative."
    )]
    pub walls: Option<Vec<i64>>,

    #[clap(long, env = "WATCH_MESSAGES", help = "Whether to run the direct message watcher (true/false).")]
    pub watch_messages: Option<bool>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_file_prefix: other.log_file_prefix.or(self.log_file_prefix),
            access_token: other.access_token.or(self.access_token),
            user_id: other.user_id.or(self.user_id),
            api_version: other.api_version.or(self.api_version),
            walls: other.walls.or(self.walls),
            watch_messages: other.watch_messages.or(self.watch_messages),
        }
    }
}

/// Final settings of the process: where to log and what to watch.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log: LogSettings,
    pub watch: WatchConfig,
    /// The configuration file, when one was found; new access tokens are read from it.
    pub config_file: Option<PathBuf>,
}

pub fn load_config() -> Result<Settings> {
    resolve(Config::parse())
}

/// Layers defaults, the config file and `cli` (which already carries the
/// environment) into [`Settings`].
pub fn resolve(cli: Config) -> Result<Settings> {
    // 1. Defaults
    let defaults = LogSettings::default();
    let mut current = Config {
        log_dir: Some(defaults.dir.clone()),
        log_level: Some(defaults.level.clone()),
        log_file_prefix: Some(defaults.file_prefix.clone()),
        watch_messages: Some(true),
        ..Default::default()
    };
    let mut watch = WatchConfig::default();
    let mut config_file = None;

    // 2. Config file, its path possibly overridden on the command line
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_watch.conf"));

    if config_file_path.exists() {
        watch = load_from_path(&config_file_path)
            .with_context(|| format!("Failed to load config file {}", config_file_path.display()))?;
        let config_str = fs::read_to_string(&config_file_path)?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        current = current.merge(file_config);
        config_file = Some(config_file_path);
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Environment variables and CLI arguments
    current = current.merge(cli);

    // 4. Flat overrides onto the engine config
    if current.access_token.is_some() {
        watch.api.access_token = current.access_token;
    }
    if current.user_id.is_some() {
        watch.api.user_id = current.user_id;
    }
    if let Some(api_version) = current.api_version {
        watch.api.api_version = api_version;
    }
    if let Some(walls) = current.walls {
        watch.walls = walls;
    }
    if let Some(watch_messages) = current.watch_messages {
        watch.watch_messages = watch_messages;
    }
    watch.validate()?;

    Ok(Settings {
        log: LogSettings {
            dir: current.log_dir.unwrap_or(defaults.dir),
            level: current.log_level.unwrap_or(defaults.level),
            file_prefix: current.log_file_prefix.unwrap_or(defaults.file_prefix),
        },
        watch,
        config_file,
    })
}
