//! Video sources and frame sampling
//!
//! A [`VideoSource`] is the video track of a capture stream. The sampler
//! pulls a still from it once a second; the source itself never pushes.

pub mod sampler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use image::{Rgb, RgbImage};

use crate::Result;
use crate::error::DeviceError;

pub use sampler::{FRAME_SIZE, FrameSampler, JPEG_QUALITY, SAMPLE_INTERVAL, SamplerEvent};

/// The video track of a capture stream
pub trait VideoSource: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Whether the track still produces frames
    fn is_live(&self) -> bool;

    /// Rasterize the current frame
    ///
    /// May block on file IO; call it off the async executor.
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be read or decoded
    fn snapshot(&self) -> Result<RgbImage>;

    /// Stop the track; it never goes live again
    fn stop(&self);
}

/// Reads the latest frame from an image file a camera daemon keeps overwriting
#[derive(Debug)]
pub struct SnapshotFileSource {
    path: PathBuf,
    stopped: AtomicBool,
}

impl SnapshotFileSource {
    /// Open a snapshot file source
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> std::result::Result<Self, DeviceError> {
        let path = path.into();
        if !path.is_file() {
            return Err(DeviceError::NotFound(format!(
                "camera snapshot {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            stopped: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VideoSource for SnapshotFileSource {
    fn describe(&self) -> String {
        format!("snapshot file {}", self.path.display())
    }

    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Result<RgbImage> {
        Ok(image::open(&self.path)?.to_rgb8())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Serves the same image on every snapshot
#[derive(Debug)]
pub struct StillImageSource {
    label: String,
    image: RgbImage,
    stopped: AtomicBool,
}

impl StillImageSource {
    #[must_use]
    pub fn new(label: impl Into<String>, image: RgbImage) -> Self {
        Self {
            label: label.into(),
            image,
            stopped: AtomicBool::new(false),
        }
    }

    /// Synthetic source for running without a camera
    #[must_use]
    pub fn test_pattern(width: u32, height: u32) -> Self {
        Self::new("test pattern", test_pattern(width, height))
    }
}

impl VideoSource for StillImageSource {
    fn describe(&self) -> String {
        format!(
            "{} ({}x{})",
            self.label,
            self.image.width(),
            self.image.height()
        )
    }

    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Result<RgbImage> {
        Ok(self.image.clone())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Eight vertical color bars over a horizontal brightness ramp
#[must_use]
pub fn test_pattern(width: u32, height: u32) -> RgbImage {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
        [0, 0, 0],
    ];

    let width = width.max(1);
    let height = height.max(1);
    RgbImage::from_fn(width, height, |x, y| {
        let bar = BARS[(x * 8 / width) as usize];
        // Bottom quarter is a gray ramp
        if y >= height * 3 / 4 {
            #[allow(clippy::cast_possible_truncation)]
            let level = (x * 255 / width) as u8;
            Rgb([level, level, level])
        } else {
            Rgb(bar)
        }
    })
}
