//! Configuration management for the assistant client
//!
//! Every setting resolves as environment variable, then config file, then
//! built-in default.

pub mod file;

use std::path::{Path, PathBuf};

use url::Url;

use crate::media::FacingMode;
use crate::session::SessionOptions;
use crate::transport::vision_endpoint;
use crate::{Error, Result};

pub use file::ClientConfigFile;

/// Service URL used when nothing else is configured
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

/// Assistant client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the assistant service
    pub server_url: Url,

    /// Camera configuration
    pub camera: CameraConfig,

    /// Audio device configuration
    pub audio: AudioConfig,
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Camera used when a session first starts
    pub facing: FacingMode,

    /// Snapshot file kept current by the front camera
    pub front_source: Option<PathBuf>,

    /// Snapshot file kept current by the back camera
    pub back_source: Option<PathBuf>,

    /// Ideal capture width
    pub width: u32,

    /// Ideal capture height
    pub height: u32,
}

/// Audio device configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name; host default when unset
    pub input_device: Option<String>,

    /// Output device name; host default when unset
    pub output_device: Option<String>,

    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load configuration using an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_sources(file::load_config_file_from(path), |key| {
            std::env::var(key).ok()
        })
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the server URL or facing mode is invalid
    pub fn from_sources(
        fc: ClientConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let server_url = env("AIVA_SERVER_URL")
            .or(fc.server.url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server_url = Url::parse(&server_url)
            .map_err(|e| Error::Config(format!("invalid server url {server_url:?}: {e}")))?;

        let facing = match env("AIVA_CAMERA_FACING").or(fc.camera.facing) {
            Some(raw) => raw.parse::<FacingMode>().map_err(Error::Config)?,
            None => FacingMode::default(),
        };

        let camera = CameraConfig {
            facing,
            front_source: env("AIVA_FRONT_CAMERA")
                .map(PathBuf::from)
                .or(fc.camera.front_source),
            back_source: env("AIVA_BACK_CAMERA")
                .map(PathBuf::from)
                .or(fc.camera.back_source),
            width: fc.camera.width.unwrap_or(1280),
            height: fc.camera.height.unwrap_or(720),
        };

        let audio = AudioConfig {
            input_device: env("AIVA_INPUT_DEVICE").or(fc.audio.input_device),
            output_device: env("AIVA_OUTPUT_DEVICE").or(fc.audio.output_device),
            echo_cancellation: fc.audio.echo_cancellation.unwrap_or(true),
            noise_suppression: fc.audio.noise_suppression.unwrap_or(true),
        };

        let config = Self {
            server_url,
            camera,
            audio,
        };
        // Reject unusable schemes at load time rather than on first start
        config.endpoint()?;
        Ok(config)
    }

    /// Streaming endpoint derived from the server URL
    ///
    /// # Errors
    ///
    /// Returns error if the server URL scheme is not http(s)
    pub fn endpoint(&self) -> Result<Url> {
        vision_endpoint(&self.server_url)
    }

    /// Session settings for this configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint cannot be derived
    pub fn session_options(&self) -> Result<SessionOptions> {
        let mut options = SessionOptions::new(self.endpoint()?).with_facing(self.camera.facing);
        options.video_width = self.camera.width;
        options.video_height = self.camera.height;
        options.echo_cancellation = self.audio.echo_cancellation;
        options.noise_suppression = self.audio.noise_suppression;
        Ok(options)
    }
}
