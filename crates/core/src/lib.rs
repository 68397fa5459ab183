//! Aloft Core Library
//!
//! Shared utilities for the aloft weather service:
//! - Configuration loading (XDG-compliant)
//! - File system utilities
//! - Common defaults

mod config;
pub mod fs;

pub use config::{find_config_file, get_xdg_cache_dir, get_xdg_data_dir, load_config, ConfigSource};
pub use fs::{create_dir_all, ensure_dir_exists, path_exists};

/// Application name used for XDG paths
pub const APP_NAME: &str = "aloft";

/// Default HTTP listen port
pub const DEFAULT_SERVER_PORT: u16 = 9610;

/// Default poller loop tick (seconds)
pub const DEFAULT_POLL_TICK: u64 = 60;

/// Default delay before the first poll sweep after startup (seconds)
pub const DEFAULT_STARTUP_DELAY: u64 = 10;
