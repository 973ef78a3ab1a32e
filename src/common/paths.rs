//! Platform configuration paths

use std::path::PathBuf;

/// Application directory name
const APP_NAME: &str = "s3tester";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/s3tester/`
/// - macOS: `~/Library/Application Support/s3tester/`
/// - Windows: `%APPDATA%\s3tester\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the runner settings file
pub fn settings_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
