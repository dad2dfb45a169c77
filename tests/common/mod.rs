//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aiva_client::error::DeviceError;
use aiva_client::media::{CaptureStream, MediaConstraints, MediaDevice, Track, TrackKind};
use aiva_client::session::{SessionController, SessionHandle, SessionOptions, SessionState};
use aiva_client::transport::{Frame, MemoryListener, PeerEnd, memory_transport};
use aiva_client::vision::{StillImageSource, VideoSource};
use aiva_client::voice::{OutputDevice, OutputProvider, OutputState};
use aiva_client::{Backends, FacingMode, StatusSnapshot};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Upper bound for waiting on the controller
pub const WAIT: Duration = Duration::from_secs(10);

/// How long a mock render takes
pub const RENDER_TIME: Duration = Duration::from_millis(100);

/// Audio track whose liveness tests can observe
pub struct MockTrack {
    live: Arc<AtomicBool>,
}

impl Track for MockTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Capture device that hands out still images and test-fed audio
#[derive(Default)]
pub struct MockMedia {
    requests: Mutex<Vec<MediaConstraints>>,
    failure: Mutex<Option<DeviceError>>,
    delay: Mutex<Option<Duration>>,
    audio_tracks: Mutex<Vec<Arc<AtomicBool>>>,
    videos: Mutex<Vec<Arc<StillImageSource>>>,
    audio_senders: Mutex<Vec<mpsc::Sender<Vec<f32>>>>,
}

impl MockMedia {
    /// Fail every acquisition with `err`
    pub fn fail_with(&self, err: DeviceError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Take this long to grant access
    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Facing modes requested so far, in order
    pub fn facings(&self) -> Vec<FacingMode> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.video.facing)
            .collect()
    }

    pub fn acquisitions(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Whether any granted track is still capturing
    pub fn any_track_live(&self) -> bool {
        self.audio_tracks
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.load(Ordering::SeqCst))
            || self.videos.lock().unwrap().iter().any(|v| v.is_live())
    }

    /// End the audio of the most recent capture stream, like an unplugged microphone
    pub fn end_audio(&self) {
        self.audio_senders.lock().unwrap().pop();
    }

    /// Push a block into the most recent capture stream
    pub async fn push_audio(&self, block: Vec<f32>) {
        let sender = self.audio_senders.lock().unwrap().last().cloned();
        sender
            .expect("no capture stream granted")
            .send(block)
            .await
            .expect("audio consumer gone");
    }
}

#[async_trait]
impl MediaDevice for MockMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<CaptureStream, DeviceError> {
        self.requests.lock().unwrap().push(*constraints);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let live = Arc::new(AtomicBool::new(true));
        let video = Arc::new(StillImageSource::test_pattern(32, 24));
        let (tx, rx) = mpsc::channel(8);

        self.audio_tracks.lock().unwrap().push(Arc::clone(&live));
        self.videos.lock().unwrap().push(Arc::clone(&video));
        self.audio_senders.lock().unwrap().push(tx);

        let video: Arc<dyn VideoSource> = video;
        Ok(CaptureStream::new(video, Box::new(MockTrack { live }), rx))
    }
}

/// Output device that records what it renders
///
/// Each payload is labelled by its first sample scaled back to 16 bits.
#[derive(Default)]
pub struct MockOutput {
    running: AtomicBool,
    closed: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
    renders: Mutex<Vec<(i16, Instant, Instant)>>,
}

impl MockOutput {
    pub fn labels(&self) -> Vec<i16> {
        self.renders.lock().unwrap().iter().map(|r| r.0).collect()
    }

    /// Start and end times of every render
    pub fn spans(&self) -> Vec<(Instant, Instant)> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.1, r.2))
            .collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputDevice for MockOutput {
    fn state(&self) -> OutputState {
        if self.closed.load(Ordering::SeqCst) {
            OutputState::Closed
        } else if self.running.load(Ordering::SeqCst) {
            OutputState::Running
        } else {
            OutputState::Suspended
        }
    }

    async fn resume(&self) -> aiva_client::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn render(&self, samples: Vec<f32>, _sample_rate: u32) -> aiva_client::Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let label = (samples[0] * 32767.0).round() as i16;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let started = Instant::now();

        tokio::time::sleep(RENDER_TIME).await;

        self.renders
            .lock()
            .unwrap()
            .push((label, started, Instant::now()));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> aiva_client::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`MockOutput`]s and remembers them
#[derive(Default)]
pub struct MockOutputProvider {
    outputs: Mutex<Vec<Arc<MockOutput>>>,
}

impl MockOutputProvider {
    pub fn latest(&self) -> Arc<MockOutput> {
        self.outputs
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no output opened")
    }

    pub fn opened(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    pub fn all_closed(&self) -> bool {
        self.outputs.lock().unwrap().iter().all(|o| o.is_closed())
    }
}

impl OutputProvider for MockOutputProvider {
    fn open_output(&self) -> aiva_client::Result<Arc<dyn OutputDevice>> {
        let output = Arc::new(MockOutput::default());
        self.outputs.lock().unwrap().push(Arc::clone(&output));
        Ok(output)
    }
}

/// A controller wired to mocks and an in-memory service
pub struct Harness {
    pub session: SessionHandle,
    pub media: Arc<MockMedia>,
    pub outputs: Arc<MockOutputProvider>,
    pub listener: MemoryListener,
    pub connector: aiva_client::transport::MemoryConnector,
}

impl Harness {
    pub fn new() -> Self {
        let media = Arc::new(MockMedia::default());
        let outputs = Arc::new(MockOutputProvider::default());
        let (connector, listener) = memory_transport();

        let options = SessionOptions::new(Url::parse("ws://assistant.test/ws/vision").unwrap());
        let backends = Backends {
            media: media.clone(),
            connector: Arc::new(connector.clone()),
            output: outputs.clone(),
        };
        let session = SessionController::spawn(options, backends);

        Self {
            session,
            media,
            outputs,
            listener,
            connector,
        }
    }

    /// Start a session and accept the service side of its channel
    pub async fn start_and_accept(&mut self) -> PeerEnd {
        self.session.start().await.expect("start failed");
        tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("no connection")
            .expect("listener closed")
    }
}

/// Wait until the status satisfies `pred`
pub async fn wait_until(
    session: &SessionHandle,
    pred: impl FnMut(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let mut status = session.subscribe();
    let snapshot = tokio::time::timeout(WAIT, status.wait_for(pred))
        .await
        .expect("timed out waiting for status")
        .expect("controller gone")
        .clone();
    snapshot
}

pub async fn wait_for_state(session: &SessionHandle, state: SessionState) -> StatusSnapshot {
    wait_until(session, |s| s.state == state).await
}

/// Next frame from the client matching `pred`, skipping others
pub async fn next_frame_where(peer: &mut PeerEnd, mut pred: impl FnMut(&Frame) -> bool) -> Frame {
    tokio::time::timeout(WAIT, async {
        loop {
            match peer.recv().await {
                Some(frame) if pred(&frame) => return frame,
                Some(_) => {}
                None => panic!("client closed the channel"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Wait for the client to close its side
pub async fn wait_closed(peer: &mut PeerEnd) {
    tokio::time::timeout(WAIT, async { while peer.recv().await.is_some() {} })
        .await
        .expect("client never closed the channel");
}

/// Hex audio payload whose first sample decodes to `label`
pub fn audio_payload(label: i16) -> String {
    hex::encode(label.to_le_bytes())
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
