//! Audio playback to speakers
//!
//! An output handle starts suspended and is only probed on the first
//! `resume`, so hardware initialization happens inside the user-initiated
//! start rather than at construction.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate of synthesized speech from the service
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Run state of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Created but not yet (or no longer) able to render
    Suspended,
    /// Ready to render
    Running,
    /// Released; never renders again
    Closed,
}

/// A device that renders one-shot PCM buffers
#[async_trait]
pub trait OutputDevice: Send + Sync {
    /// Current run state
    fn state(&self) -> OutputState;

    /// Bring a suspended device to `Running`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be resumed
    async fn resume(&self) -> Result<()>;

    /// Render a buffer and resolve once it has finished playing
    ///
    /// # Errors
    ///
    /// Returns error if the device is not running or playback fails
    async fn render(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()>;

    /// Release the device
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails to release; the device is
    /// treated as closed regardless
    fn close(&self) -> Result<()>;

    /// Resume the device if it is suspended
    ///
    /// Cheap when already running; checked before every render.
    ///
    /// # Errors
    ///
    /// Returns error if the device is closed or cannot be resumed
    async fn ensure_running(&self) -> Result<()> {
        match self.state() {
            OutputState::Running => Ok(()),
            OutputState::Suspended => {
                tracing::debug!("resuming suspended output device");
                self.resume().await
            }
            OutputState::Closed => Err(Error::Output("output device closed".to_string())),
        }
    }
}

/// Creates a fresh output handle for each session start
pub trait OutputProvider: Send + Sync {
    /// Create a new, suspended output handle
    ///
    /// # Errors
    ///
    /// Returns error if the handle cannot be created
    fn open_output(&self) -> Result<Arc<dyn OutputDevice>>;
}

/// Plays audio to a cpal output device
pub struct SpeakerOutput {
    device_name: Option<String>,
    state: Mutex<OutputState>,
    config: Mutex<Option<StreamConfig>>,
    cancel: Arc<AtomicBool>,
}

impl SpeakerOutput {
    /// Create a suspended handle for the named (or default) output device
    #[must_use]
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            state: Mutex::new(OutputState::Suspended),
            config: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn set_state(&self, state: OutputState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn stream_config(&self) -> Option<StreamConfig> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OutputDevice for SpeakerOutput {
    fn state(&self) -> OutputState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resume(&self) -> Result<()> {
        if self.state() == OutputState::Closed {
            return Err(Error::Output("output device closed".to_string()));
        }

        let name = self.device_name.clone();
        let config = tokio::task::spawn_blocking(move || probe_output(name.as_deref()))
            .await
            .map_err(|e| Error::Output(e.to_string()))??;

        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config);
        // A close racing the probe wins
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == OutputState::Suspended {
            *state = OutputState::Running;
        }
        Ok(())
    }

    async fn render(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        if self.state() != OutputState::Running {
            return Err(Error::Output("output device not running".to_string()));
        }
        if sample_rate != PLAYBACK_SAMPLE_RATE {
            return Err(Error::Output(format!(
                "unsupported playback rate {sample_rate} Hz"
            )));
        }
        let config = self
            .stream_config()
            .ok_or_else(|| Error::Output("output device not configured".to_string()))?;

        let name = self.device_name.clone();
        let cancel = Arc::clone(&self.cancel);
        let result = tokio::task::spawn_blocking(move || {
            play_samples_blocking(name.as_deref(), &config, samples, &cancel)
        })
        .await
        .map_err(|e| Error::Output(e.to_string()))?;

        if result.is_err() && self.state() == OutputState::Running {
            // Re-probe on the next drain step
            self.set_state(OutputState::Suspended);
        }
        result
    }

    fn close(&self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        self.set_state(OutputState::Closed);
        Ok(())
    }
}

/// Hands out [`SpeakerOutput`] handles
#[derive(Debug, Clone, Default)]
pub struct SpeakerProvider {
    device_name: Option<String>,
}

impl SpeakerProvider {
    #[must_use]
    pub const fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl OutputProvider for SpeakerProvider {
    fn open_output(&self) -> Result<Arc<dyn OutputDevice>> {
        Ok(Arc::new(SpeakerOutput::new(self.device_name.clone())))
    }
}

fn find_output_device(wanted: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match wanted {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| Error::Output(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| Error::Output(format!("output device {wanted:?} not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Output("no output device available".to_string())),
    }
}

fn probe_output(wanted: Option<&str>) -> Result<StreamConfig> {
    let device = find_output_device(wanted)?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Output(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Output("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels = config.channels,
        "audio playback initialized"
    );

    Ok(config)
}

/// Play samples, returning once they have drained or `cancel` is raised
fn play_samples_blocking(
    wanted: Option<&str>,
    config: &StreamConfig,
    samples: Vec<f32>,
    cancel: &AtomicBool,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = find_output_device(wanted)?;
    let channels = usize::from(config.channels);

    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position_cb.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = if let Some(&s) = samples_cb.get(pos) {
                        pos += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::Relaxed);
                        0.0
                    };
                    frame.fill(sample);
                }
                position_cb.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Output(e.to_string()))?;

    stream.play().map_err(|e| Error::Output(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!("playback cancelled");
            return Ok(());
        }
        if start.elapsed() > timeout {
            tracing::warn!(samples = sample_count, "playback did not drain before timeout");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::trace!(samples = sample_count, "playback complete");

    Ok(())
}
