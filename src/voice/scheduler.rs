//! Ordered playback of inbound synthesized audio
//!
//! Payloads render strictly one at a time in arrival order. Completion of
//! item n is the only thing that starts item n+1. A payload that fails to
//! decode or render is discarded and draining resumes after a short delay.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Sleep;

use crate::Result;
use crate::voice::pcm;
use crate::voice::playback::{OutputDevice, PLAYBACK_SAMPLE_RATE};

/// Delay before draining resumes after a failed payload
pub const RETRY_DELAY: Duration = Duration::from_millis(50);

type RenderFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

enum Stage {
    Idle,
    Rendering(RenderFuture),
    Backoff(Pin<Box<Sleep>>),
}

/// FIFO playback queue with a single in-flight render
///
/// Driven cooperatively: the owner calls [`PlaybackScheduler::step`] from
/// its event loop. `step` is cancel-safe, the in-flight render lives in the
/// scheduler rather than in the `step` future.
pub struct PlaybackScheduler {
    queue: VecDeque<String>,
    stage: Stage,
    output: Arc<dyn OutputDevice>,
    rendered: u64,
    discarded: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler rendering to `output`
    #[must_use]
    pub fn new(output: Arc<dyn OutputDevice>) -> Self {
        Self {
            queue: VecDeque::new(),
            stage: Stage::Idle,
            output,
            rendered: 0,
            discarded: 0,
        }
    }

    /// Append a payload to the tail and start draining if nothing is rendering
    pub fn enqueue_and_drain(&mut self, payload: String) {
        self.queue.push_back(payload);
        self.drain();
    }

    /// Wait for the in-flight render or backoff to finish and advance the queue
    ///
    /// Pending forever while idle, so it can sit in a `select!` branch.
    pub async fn step(&mut self) {
        match &mut self.stage {
            Stage::Idle => std::future::pending::<()>().await,
            Stage::Rendering(render) => {
                let outcome = render.as_mut().await;
                self.stage = Stage::Idle;
                match outcome {
                    Ok(()) => {
                        self.rendered += 1;
                        self.drain();
                    }
                    Err(e) => {
                        self.discarded += 1;
                        tracing::warn!(error = %e, "discarding audio payload");
                        self.stage = Stage::Backoff(Box::pin(tokio::time::sleep(RETRY_DELAY)));
                    }
                }
            }
            Stage::Backoff(delay) => {
                delay.as_mut().await;
                self.stage = Stage::Idle;
                self.drain();
            }
        }
    }

    /// Drop every queued payload and abandon the in-flight render
    pub fn clear(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.stage = Stage::Idle;
        if dropped > 0 {
            tracing::debug!(dropped, "playback queue cleared");
        }
    }

    /// Whether a payload is being rendered right now
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self.stage, Stage::Rendering(_))
    }

    /// Nothing rendering, nothing waiting, no retry pending
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.stage, Stage::Idle) && self.queue.is_empty()
    }

    /// Payloads waiting behind the in-flight one
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Payloads rendered to completion
    #[must_use]
    pub const fn rendered(&self) -> u64 {
        self.rendered
    }

    /// Payloads dropped after a decode or render failure
    #[must_use]
    pub const fn discarded(&self) -> u64 {
        self.discarded
    }

    /// The output device this scheduler renders to
    #[must_use]
    pub fn output(&self) -> &Arc<dyn OutputDevice> {
        &self.output
    }

    fn drain(&mut self) {
        if self.is_busy() {
            return;
        }
        let Some(payload) = self.queue.pop_front() else {
            return;
        };

        let output = Arc::clone(&self.output);
        self.stage = Stage::Rendering(Box::pin(async move {
            output.ensure_running().await?;
            let samples = pcm::decode_payload(&payload)?;
            output.render(samples, PLAYBACK_SAMPLE_RATE).await
        }));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;
    use tokio_test::assert_pending;

    use super::*;
    use crate::voice::playback::OutputState;

    const RENDER_TIME: Duration = Duration::from_millis(100);

    #[derive(Default)]
    struct RecordingOutput {
        starts: Mutex<Vec<(i16, Instant)>>,
        ends: Mutex<Vec<(i16, Instant)>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        suspended: std::sync::atomic::AtomicBool,
        resumes: AtomicUsize,
    }

    #[async_trait]
    impl OutputDevice for RecordingOutput {
        fn state(&self) -> OutputState {
            if self.suspended.load(Ordering::SeqCst) {
                OutputState::Suspended
            } else {
                OutputState::Running
            }
        }

        async fn resume(&self) -> Result<()> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            self.suspended.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn render(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
            assert_eq!(sample_rate, PLAYBACK_SAMPLE_RATE);
            #[allow(clippy::cast_possible_truncation)]
            let label = (samples[0] * 32767.0).round() as i16;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.starts.lock().unwrap().push((label, Instant::now()));

            tokio::time::sleep(RENDER_TIME).await;

            self.ends.lock().unwrap().push((label, Instant::now()));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn payload(label: i16) -> String {
        hex::encode(label.to_le_bytes())
    }

    async fn run_until_idle(scheduler: &mut PlaybackScheduler) {
        while !scheduler.is_idle() {
            scheduler.step().await;
        }
    }

    fn labels(events: &Mutex<Vec<(i16, Instant)>>) -> Vec<i16> {
        events.lock().unwrap().iter().map(|(l, _)| *l).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_renders_in_insertion_order_one_at_a_time() {
        let output = Arc::new(RecordingOutput::default());
        let mut scheduler = PlaybackScheduler::new(output.clone());

        scheduler.enqueue_and_drain(payload(1));
        scheduler.enqueue_and_drain(payload(2));
        scheduler.enqueue_and_drain(payload(3));
        assert!(scheduler.is_busy());
        assert_eq!(scheduler.len(), 2);

        run_until_idle(&mut scheduler).await;

        assert_eq!(labels(&output.starts), vec![1, 2, 3]);
        assert_eq!(output.max_active.load(Ordering::SeqCst), 1);

        let starts = output.starts.lock().unwrap().clone();
        let ends = output.ends.lock().unwrap().clone();
        for i in 1..starts.len() {
            assert!(starts[i].1 >= ends[i - 1].1, "item {i} started early");
        }
        assert_eq!(scheduler.rendered(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_while_rendering_does_not_overlap() {
        let output = Arc::new(RecordingOutput::default());
        let mut scheduler = PlaybackScheduler::new(output.clone());

        scheduler.enqueue_and_drain(payload(10));

        // Interrupt the first render midway and enqueue behind it
        tokio::select! {
            () = scheduler.step() => panic!("render finished too early"),
            () = tokio::time::sleep(RENDER_TIME / 2) => {}
        }
        scheduler.enqueue_and_drain(payload(20));
        assert!(scheduler.is_busy());
        assert_eq!(scheduler.len(), 1);

        run_until_idle(&mut scheduler).await;

        assert_eq!(labels(&output.starts), vec![10, 20]);
        assert_eq!(output.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_discarded_after_backoff() {
        let output = Arc::new(RecordingOutput::default());
        let mut scheduler = PlaybackScheduler::new(output.clone());

        scheduler.enqueue_and_drain(payload(1));
        scheduler.enqueue_and_drain("not audio at all!".to_string());
        scheduler.enqueue_and_drain(payload(3));

        run_until_idle(&mut scheduler).await;

        assert_eq!(labels(&output.starts), vec![1, 3]);
        assert_eq!(scheduler.rendered(), 2);
        assert_eq!(scheduler.discarded(), 1);

        let first_end = output.ends.lock().unwrap()[0].1;
        let second_start = output.starts.lock().unwrap()[1].1;
        assert!(second_start - first_end >= RETRY_DELAY);
        assert!(second_start - first_end < RETRY_DELAY + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_output_is_resumed_on_every_drain() {
        let output = Arc::new(RecordingOutput::default());
        output.suspended.store(true, Ordering::SeqCst);
        let mut scheduler = PlaybackScheduler::new(output.clone());

        scheduler.enqueue_and_drain(payload(1));
        run_until_idle(&mut scheduler).await;
        assert_eq!(output.resumes.load(Ordering::SeqCst), 1);

        // Suspended again between payloads
        output.suspended.store(true, Ordering::SeqCst);
        scheduler.enqueue_and_drain(payload(2));
        run_until_idle(&mut scheduler).await;
        assert_eq!(output.resumes.load(Ordering::SeqCst), 2);
        assert_eq!(labels(&output.starts), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_abandons_queue() {
        let output = Arc::new(RecordingOutput::default());
        let mut scheduler = PlaybackScheduler::new(output.clone());

        scheduler.enqueue_and_drain(payload(1));
        scheduler.enqueue_and_drain(payload(2));
        scheduler.clear();

        assert!(scheduler.is_idle());
        assert!(!scheduler.is_busy());

        let mut step = tokio_test::task::spawn(scheduler.step());
        assert_pending!(step.poll());
    }
}
