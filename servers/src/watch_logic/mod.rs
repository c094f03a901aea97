pub mod config;
pub mod events;
pub mod logger;
pub mod token;
