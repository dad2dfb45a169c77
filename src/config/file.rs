//! TOML configuration file loading
//!
//! Supports `~/.config/aiva/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ClientConfigFile {
    /// Assistant service
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Camera selection
    #[serde(default)]
    pub camera: CameraFileConfig,

    /// Microphone and speaker
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Assistant service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Base URL, e.g. "https://assist.example.com"
    pub url: Option<String>,
}

/// Camera configuration
#[derive(Debug, Default, Deserialize)]
pub struct CameraFileConfig {
    /// Starting camera: "user" or "environment"
    pub facing: Option<String>,

    /// Snapshot file for the front camera
    pub front_source: Option<PathBuf>,

    /// Snapshot file for the back camera
    pub back_source: Option<PathBuf>,

    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Input device name
    pub input_device: Option<String>,

    /// Output device name
    pub output_device: Option<String>,

    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ClientConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ClientConfigFile {
    config_file_path().map_or_else(ClientConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or unparsable files yield defaults.
pub fn load_config_file_from(path: &Path) -> ClientConfigFile {
    if !path.exists() {
        return ClientConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ClientConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ClientConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/aiva/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("aiva").join("config.toml"))
}
