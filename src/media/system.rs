//! Host capture devices
//!
//! Audio comes from the cpal microphone. Video comes from a per-camera
//! snapshot file kept fresh by whatever drives the camera, or from a
//! generated test pattern.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CaptureStream, FacingMode, MediaConstraints, MediaDevice};
use crate::error::DeviceError;
use crate::vision::{SnapshotFileSource, StillImageSource, VideoSource};
use crate::voice::{Microphone, MicrophoneOptions, SAMPLE_RATE};

/// Audio blocks buffered between the capture thread and the session
const AUDIO_QUEUE_DEPTH: usize = 32;

/// Capture devices on this machine
#[derive(Debug, Clone, Default)]
pub struct SystemMedia {
    front_source: Option<PathBuf>,
    back_source: Option<PathBuf>,
    test_pattern: bool,
    input_device: Option<String>,
}

impl SystemMedia {
    #[must_use]
    pub const fn new(
        front_source: Option<PathBuf>,
        back_source: Option<PathBuf>,
        input_device: Option<String>,
    ) -> Self {
        Self {
            front_source,
            back_source,
            test_pattern: false,
            input_device,
        }
    }

    /// Serve a generated test pattern when no camera source is configured
    #[must_use]
    pub const fn with_test_pattern(mut self, enabled: bool) -> Self {
        self.test_pattern = enabled;
        self
    }

    fn open_video(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn VideoSource>, DeviceError> {
        let facing = constraints.video.facing;
        let configured = match facing {
            FacingMode::User => self.front_source.as_ref(),
            FacingMode::Environment => self.back_source.as_ref(),
        };

        match configured {
            Some(path) => Ok(Arc::new(SnapshotFileSource::open(path)?)),
            None if self.test_pattern => Ok(Arc::new(StillImageSource::test_pattern(
                constraints.video.width,
                constraints.video.height,
            ))),
            None => Err(DeviceError::NotFound(format!("no {facing} camera configured"))),
        }
    }
}

#[async_trait]
impl MediaDevice for SystemMedia {
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<CaptureStream, DeviceError> {
        let audio = &constraints.audio;
        if audio.channel_count != 1 || audio.sample_rate != SAMPLE_RATE {
            return Err(DeviceError::Overconstrained(format!(
                "microphone only captures mono {SAMPLE_RATE} Hz"
            )));
        }

        let video = self.open_video(constraints)?;

        let (blocks_tx, blocks_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let options = MicrophoneOptions {
            device_name: self.input_device.clone(),
            echo_cancellation: audio.echo_cancellation,
            noise_suppression: audio.noise_suppression,
        };
        let microphone = match Microphone::open(options, blocks_tx).await {
            Ok(mic) => mic,
            Err(e) => {
                video.stop();
                return Err(e);
            }
        };

        tracing::info!(
            camera = %video.describe(),
            microphone = microphone.device_name(),
            facing = %constraints.video.facing,
            "capture acquired"
        );

        Ok(CaptureStream::new(video, Box::new(microphone), blocks_rx))
    }
}
