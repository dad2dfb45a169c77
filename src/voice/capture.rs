//! Audio capture from microphone
//!
//! The cpal stream is not `Send`, so it lives on its own thread for the
//! lifetime of the capture. Samples are re-chunked into fixed-size blocks
//! and handed to the async side over a bounded channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use crate::error::DeviceError;
use crate::voice::pcm;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per outbound audio block
pub const BLOCK_SIZE: usize = 1024;

/// Microphone selection and processing requests
#[derive(Debug, Clone)]
pub struct MicrophoneOptions {
    /// Input device name; `None` picks the host default
    pub device_name: Option<String>,
    /// Request echo cancellation from the host
    pub echo_cancellation: bool,
    /// Request noise suppression from the host
    pub noise_suppression: bool,
}

impl Default for MicrophoneOptions {
    fn default() -> Self {
        Self {
            device_name: None,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Splits an arbitrary stream of samples into fixed-size blocks
#[derive(Debug)]
pub struct BlockAssembler {
    pending: Vec<f32>,
    block_size: usize,
}

impl BlockAssembler {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(block_size),
            block_size,
        }
    }

    /// Append samples and emit every completed block in order
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.block_size {
                let block =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(block);
            }
        }
    }

    /// Number of samples waiting for a full block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Captures mono 16kHz audio from an input device
pub struct Microphone {
    device_name: String,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    live: Arc<AtomicBool>,
    dropped_blocks: Arc<AtomicU64>,
}

impl Microphone {
    /// Open the input device and start delivering blocks to `blocks`
    ///
    /// Resolves once the stream is playing or has failed to start.
    ///
    /// # Errors
    ///
    /// Returns error if no device matches, the device cannot capture mono
    /// 16kHz, or the host refuses access
    pub async fn open(
        options: MicrophoneOptions,
        blocks: mpsc::Sender<Vec<f32>>,
    ) -> std::result::Result<Self, DeviceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let live = Arc::new(AtomicBool::new(false));
        let dropped_blocks = Arc::new(AtomicU64::new(0));

        let thread_live = Arc::clone(&live);
        let thread_dropped = Arc::clone(&dropped_blocks);
        let disconnect = stop_tx.clone();

        std::thread::Builder::new()
            .name("aiva-microphone".to_string())
            .spawn(move || {
                let started = open_input_stream(&options, blocks, &thread_dropped, disconnect);
                let (stream, name) = match started {
                    Ok(started) => started,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                thread_live.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(name));

                // Woken by `stop` (also run on drop) and by device loss. The
                // error callback holds a sender, so a closed channel never wakes it.
                // Dropping the stream drops the block sender and ends the queue.
                let _ = stop_rx.recv();
                thread_live.store(false, Ordering::SeqCst);
                drop(stream);
                tracing::debug!("audio capture stopped");
            })
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let device_name = ready_rx
            .await
            .map_err(|_| DeviceError::Backend("capture thread exited".to_string()))??;

        Ok(Self {
            device_name,
            stop_tx: Some(stop_tx),
            live,
            dropped_blocks,
        })
    }

    /// Stop capturing audio
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the stream is still delivering samples
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.stop_tx.is_some() && self.live.load(Ordering::SeqCst)
    }

    /// Name of the device being captured
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Blocks discarded because the consumer fell behind
    #[must_use]
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input_stream(
    options: &MicrophoneOptions,
    blocks: mpsc::Sender<Vec<f32>>,
    dropped: &Arc<AtomicU64>,
    disconnect: std::sync::mpsc::Sender<()>,
) -> std::result::Result<(Stream, String), DeviceError> {
    let host = cpal::default_host();
    let device = find_input_device(&host, options.device_name.as_deref())?;
    let name = device.name().unwrap_or_default();

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Backend(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| {
            DeviceError::Overconstrained(format!("{name} cannot capture mono {SAMPLE_RATE} Hz"))
        })?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    if options.echo_cancellation || options.noise_suppression {
        tracing::debug!(
            echo_cancellation = options.echo_cancellation,
            noise_suppression = options.noise_suppression,
            "voice processing requested; left to the host audio stack"
        );
    }

    let mut assembler = BlockAssembler::new(BLOCK_SIZE);
    let dropped = Arc::clone(dropped);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data, |block| {
                    forward_block(&blocks, block, &dropped);
                });
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                if is_disconnect(&err) {
                    let _ = disconnect.send(());
                }
            },
            None,
        )
        .map_err(map_build_error)?;

    stream
        .play()
        .map_err(|e| DeviceError::Backend(e.to_string()))?;

    tracing::debug!(
        device = %name,
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture started"
    );

    Ok((stream, name))
}

/// Hand a block to the consumer without blocking the audio callback
///
/// A full queue drops the block; the first drop of a capture is logged.
/// Returns whether the block was queued.
fn forward_block(blocks: &mpsc::Sender<Vec<f32>>, block: Vec<f32>, dropped: &AtomicU64) -> bool {
    match blocks.try_send(block) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            if dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                tracing::debug!("audio consumer fell behind, dropping blocks");
            }
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Whether a stream error means the input device is gone for good
fn is_disconnect(err: &cpal::StreamError) -> bool {
    matches!(err, cpal::StreamError::DeviceNotAvailable)
}

fn find_input_device(
    host: &cpal::Host,
    wanted: Option<&str>,
) -> std::result::Result<Device, DeviceError> {
    match wanted {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| DeviceError::NotFound(format!("input device {wanted:?}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| DeviceError::NotFound("no input device available".to_string())),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::NotFound("input device no longer available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::Overconstrained("stream config not supported".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            let message = err.to_string();
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") {
                DeviceError::PermissionDenied(message)
            } else {
                DeviceError::Backend(message)
            }
        }
        other => DeviceError::Backend(other.to_string()),
    }
}

/// Convert f32 samples to 16-bit WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Output(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(pcm::float_to_i16(sample))
                .map_err(|e| Error::Output(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Output(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
