//! ZenTalk Settings
//!
//! JSON settings with serde defaults: load from the default path or an
//! explicit one, save back, and fall back to defaults when no file exists.

mod config;

pub use config::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to create settings directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Default settings location: `~/.zentalk/settings.json`
pub fn default_settings_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".zentalk").join("settings.json")
}

/// Default data directory: `~/.zentalk`
pub fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".zentalk")
}
