//! Path utilities for rcluster.
//!
//! All local state lives under `~/.rcluster/`:
//! - `~/.rcluster/config.toml` - main configuration
//! - `~/.rcluster/sessions/` - one session record per profile and region

use std::path::PathBuf;

/// Returns the rcluster home directory (`~/.rcluster/`).
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rcluster")
}

/// Returns the default config file path (`~/.rcluster/config.toml`).
pub fn default_config() -> PathBuf {
    home_dir().join("config.toml")
}

/// Returns the default state directory (`~/.rcluster/`).
pub fn state_dir() -> PathBuf {
    home_dir()
}
