//! Capture device acquisition
//!
//! A [`MediaDevice`] turns [`MediaConstraints`] into a [`CaptureStream`]
//! holding one video and one audio track. Stopping the stream stops every
//! track; dropping it does the same.

pub mod system;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DeviceError;
use crate::vision::VideoSource;
use crate::voice::{Microphone, SAMPLE_RATE};

pub use system::SystemMedia;

/// Which camera to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the user
    #[default]
    User,
    /// Rear camera, facing away from the user
    Environment,
}

impl FacingMode {
    /// The other camera
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::User => Self::Environment,
            Self::Environment => Self::User,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "front" => Ok(Self::User),
            "environment" | "back" | "rear" => Ok(Self::Environment),
            other => Err(format!("unknown facing mode: {other}")),
        }
    }
}

/// Requested video track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub facing: FacingMode,
    /// Ideal width; sources may deliver something else
    pub width: u32,
    /// Ideal height; sources may deliver something else
    pub height: u32,
}

/// Requested audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            channel_count: 1,
            sample_rate: SAMPLE_RATE,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// What a session asks the capture devices for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

impl MediaConstraints {
    /// Default 1280x720 video plus speech audio for the given camera
    #[must_use]
    pub fn for_facing(facing: FacingMode) -> Self {
        Self {
            video: VideoConstraints {
                facing,
                width: 1280,
                height: 720,
            },
            audio: AudioConstraints::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One live capture track
pub trait Track: Send {
    fn kind(&self) -> TrackKind;

    /// Stop capturing; idempotent
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

impl Track for Microphone {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&mut self) {
        Self::stop(self);
    }

    fn is_live(&self) -> bool {
        Self::is_live(self)
    }
}

/// Video track backed by a shared [`VideoSource`]
pub struct VideoTrack(Arc<dyn VideoSource>);

impl Track for VideoTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&mut self) {
        self.0.stop();
    }

    fn is_live(&self) -> bool {
        self.0.is_live()
    }
}

/// A live camera plus microphone capture
pub struct CaptureStream {
    video: Arc<dyn VideoSource>,
    audio_blocks: Option<mpsc::Receiver<Vec<f32>>>,
    tracks: Vec<Box<dyn Track>>,
}

impl CaptureStream {
    /// Bundle a video source with an audio track and its block queue
    #[must_use]
    pub fn new(
        video: Arc<dyn VideoSource>,
        audio: Box<dyn Track>,
        audio_blocks: mpsc::Receiver<Vec<f32>>,
    ) -> Self {
        let tracks: Vec<Box<dyn Track>> = vec![Box::new(VideoTrack(Arc::clone(&video))), audio];
        Self {
            video,
            audio_blocks: Some(audio_blocks),
            tracks,
        }
    }

    /// The video source, for sampling
    #[must_use]
    pub fn video(&self) -> Arc<dyn VideoSource> {
        Arc::clone(&self.video)
    }

    /// Take the queue of 1024-sample audio blocks; `None` after the first call
    pub fn take_audio_blocks(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.audio_blocks.take()
    }

    /// Stop every track
    pub fn stop_all_tracks(&mut self) {
        for track in &mut self.tracks {
            track.stop();
        }
        if let Some(mut blocks) = self.audio_blocks.take() {
            blocks.close();
        }
    }

    /// Whether any track is still capturing
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Kinds of the tracks in this stream
    #[must_use]
    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.tracks.iter().map(|t| t.kind()).collect()
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop_all_tracks();
    }
}

/// Grants access to camera and microphone
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Acquire a capture stream satisfying `constraints`
    ///
    /// # Errors
    ///
    /// Returns error if access is denied, no device matches or the
    /// constraints cannot be met
    async fn acquire(&self, constraints: &MediaConstraints)
    -> Result<CaptureStream, DeviceError>;
}
