//! Periodic video frame sampling
//!
//! Once a second the current frame is scaled to 768x768, JPEG encoded at
//! quality 80 and sent as a `video` message. Encoding runs on the blocking
//! pool; the result is sent only if the channel is still open when it lands.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::VideoSource;
use crate::transport::Channel;
use crate::{Error, Result, protocol};

/// Time between samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Width and height of every sent frame
pub const FRAME_SIZE: u32 = 768;

/// JPEG quality of every sent frame
pub const JPEG_QUALITY: u8 = 80;

/// What woke the sampler
#[derive(Debug)]
pub enum SamplerEvent {
    /// Time to take a sample
    Tick,
    /// A snapshot finished encoding
    Encoded(Result<Vec<u8>>),
}

/// Samples a video source on a fixed period
pub struct FrameSampler {
    source: Arc<dyn VideoSource>,
    ticker: Option<Interval>,
    encodes: JoinSet<Result<Vec<u8>>>,
    sent: u64,
}

impl FrameSampler {
    /// Start sampling; the first tick is one period from now
    #[must_use]
    pub fn start(source: Arc<dyn VideoSource>) -> Self {
        let mut ticker = tokio::time::interval_at(Instant::now() + SAMPLE_INTERVAL, SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(source = %source.describe(), "frame sampler started");

        Self {
            source,
            ticker: Some(ticker),
            encodes: JoinSet::new(),
            sent: 0,
        }
    }

    /// Wait for the next tick or finished encode
    ///
    /// Cancel-safe. Pending forever once cancelled.
    pub async fn next_event(&mut self) -> SamplerEvent {
        let Some(ticker) = self.ticker.as_mut() else {
            return std::future::pending().await;
        };

        tokio::select! {
            _ = ticker.tick() => SamplerEvent::Tick,
            Some(joined) = self.encodes.join_next(), if !self.encodes.is_empty() => {
                SamplerEvent::Encoded(joined.map_err(|e| Error::Output(format!("frame encode task failed: {e}"))).and_then(|r| r))
            }
        }
    }

    /// Handle a tick; a snapshot is taken only while the channel is open
    ///
    /// Returns whether an encode was started.
    pub fn on_tick(&mut self, channel_open: bool) -> bool {
        if self.ticker.is_none() || !channel_open || !self.source.is_live() {
            return false;
        }

        let source = Arc::clone(&self.source);
        self.encodes.spawn_blocking(move || {
            let frame = source.snapshot()?;
            encode_jpeg(&frame)
        });
        true
    }

    /// Handle a finished encode; sent only if the channel is open now
    ///
    /// Returns whether a frame was sent.
    pub fn on_encoded(&mut self, result: Result<Vec<u8>>, channel: &Channel) -> bool {
        let jpeg = match result {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!(error = %e, "frame sample failed");
                return false;
            }
        };
        if self.ticker.is_none() || !channel.is_open() {
            return false;
        }

        let sent =
            protocol::video_frame(&jpeg).and_then(|frame| channel.send(frame).map_err(Error::from));
        match sent {
            Ok(()) => {
                self.sent += 1;
                tracing::trace!(bytes = jpeg.len(), "video frame sent");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "video frame dropped");
                false
            }
        }
    }

    /// Stop the timer and abandon in-flight encodes
    pub fn cancel(&mut self) {
        if self.ticker.take().is_some() {
            self.encodes.abort_all();
            tracing::debug!(sent = self.sent, "frame sampler stopped");
        }
    }

    /// Whether the timer is still running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Encodes currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.encodes.len()
    }

    /// Frames sent so far
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Scale a frame to the sent size and JPEG encode it
///
/// # Errors
///
/// Returns error if JPEG encoding fails
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let scaled = imageops::resize(frame, FRAME_SIZE, FRAME_SIZE, FilterType::Triangle);
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(&scaled)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use image::GenericImageView;
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::Frame;
    use crate::vision::StillImageSource;

    fn source() -> Arc<dyn VideoSource> {
        Arc::new(StillImageSource::test_pattern(64, 48))
    }

    fn channel_pair() -> (Channel, mpsc::UnboundedReceiver<Frame>, mpsc::UnboundedSender<Frame>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (Channel::new(out_tx, in_rx, "mem://test"), out_rx, in_tx)
    }

    #[test]
    fn test_encoded_frames_are_square_jpeg() {
        let jpeg = encode_jpeg(&crate::vision::test_pattern(1280, 720)).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (FRAME_SIZE, FRAME_SIZE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let mut sampler = FrameSampler::start(source());
        let started = Instant::now();

        assert!(matches!(sampler.next_event().await, SamplerEvent::Tick));
        assert!(started.elapsed() >= SAMPLE_INTERVAL);
    }

    #[tokio::test]
    async fn test_sample_sent_as_video_message() {
        let (channel, mut peer_rx, _peer_tx) = channel_pair();
        let mut sampler = FrameSampler::start(source());

        assert!(sampler.on_tick(true));
        let SamplerEvent::Encoded(result) = sampler.encodes_only().await else {
            panic!("expected encode result");
        };
        assert!(sampler.on_encoded(result, &channel));

        let Some(Frame::Text(text)) = peer_rx.recv().await else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "video");
        assert!(value["data"].as_str().is_some_and(|d| d.starts_with("/9j/")));
        assert_eq!(sampler.sent(), 1);
    }

    #[tokio::test]
    async fn test_tick_ignored_while_channel_closed() {
        let mut sampler = FrameSampler::start(source());
        assert!(!sampler.on_tick(false));
        assert_eq!(sampler.in_flight(), 0);

        // Channel back: the next tick samples again
        assert!(sampler.on_tick(true));
        assert_eq!(sampler.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_result_dropped_if_channel_closed_meanwhile() {
        let (mut channel, _peer_rx, _peer_tx) = channel_pair();
        let mut sampler = FrameSampler::start(source());

        assert!(sampler.on_tick(true));
        let SamplerEvent::Encoded(result) = sampler.encodes_only().await else {
            panic!("expected encode result");
        };
        channel.close();
        assert!(!sampler.on_encoded(result, &channel));
        assert_eq!(sampler.sent(), 0);
    }

    #[tokio::test]
    async fn test_stopped_source_not_sampled() {
        let still = Arc::new(StillImageSource::test_pattern(8, 8));
        let mut sampler = FrameSampler::start(still.clone());
        still.stop();
        assert!(!sampler.on_tick(true));
    }

    #[tokio::test]
    async fn test_cancel_stops_everything() {
        let mut sampler = FrameSampler::start(source());
        assert!(sampler.on_tick(true));
        sampler.cancel();

        assert!(!sampler.is_running());
        assert!(!sampler.on_tick(true));
        let mut next = tokio_test::task::spawn(sampler.next_event());
        tokio_test::assert_pending!(next.poll());
    }

    impl FrameSampler {
        /// Wait for the next encode, ignoring ticks
        async fn encodes_only(&mut self) -> SamplerEvent {
            loop {
                if let event @ SamplerEvent::Encoded(_) = self.next_event().await {
                    return event;
                }
            }
        }
    }
}
