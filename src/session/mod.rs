//! Streaming session lifecycle
//!
//! The [`SessionController`] owns every piece of per-session state and runs
//! as a single task. Callers talk to it through a cloneable
//! [`SessionHandle`]; all mutation happens on the controller's own loop, so
//! capture callbacks, channel events and timers never race each other.
//!
//! ```text
//! Idle ──start──▶ Starting ──acquired+connected──▶ Active
//!  ▲                 │                               │
//!  └── stop/failure ─┴──── stop / channel closed ────┘
//! ```

pub mod camera;
pub mod status;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use url::Url;
use uuid::Uuid;

use crate::error::{PeerError, StartError};
use crate::media::{CaptureStream, FacingMode, MediaConstraints, MediaDevice};
use crate::protocol::{self, InboundMessage, OutboundMessage};
use crate::transport::{Channel, Connector, Frame};
use crate::vision::{FrameSampler, SamplerEvent};
use crate::voice::{AudioEncoder, OutputDevice, OutputProvider, PlaybackScheduler};
use crate::{Error, Result};

pub use camera::{CameraModeController, RESTART_DELAY};
pub use status::{Monitoring, SessionState, StatusSnapshot, ToolEvent};

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Streaming endpoint, see [`crate::transport::vision_endpoint`]
    pub endpoint: Url,
    /// Camera used by the first start
    pub facing: FacingMode,
    pub video_width: u32,
    pub video_height: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl SessionOptions {
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            facing: FacingMode::User,
            video_width: 1280,
            video_height: 720,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }

    #[must_use]
    pub const fn with_facing(mut self, facing: FacingMode) -> Self {
        self.facing = facing;
        self
    }

    fn constraints(&self, facing: FacingMode) -> MediaConstraints {
        let mut constraints = MediaConstraints::for_facing(facing);
        constraints.video.width = self.video_width;
        constraints.video.height = self.video_height;
        constraints.audio.echo_cancellation = self.echo_cancellation;
        constraints.audio.noise_suppression = self.noise_suppression;
        constraints
    }
}

/// The devices and transport a session runs on
#[derive(Clone)]
pub struct Backends {
    pub media: Arc<dyn MediaDevice>,
    pub connector: Arc<dyn Connector>,
    pub output: Arc<dyn OutputProvider>,
}

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    SwitchCamera(oneshot::Sender<FacingMode>),
    SendText(String, oneshot::Sender<Result<()>>),
}

/// Cloneable front end of a running [`SessionController`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
}

impl SessionHandle {
    /// Start streaming
    ///
    /// Resolves once the session is `Active` or the start has failed. A
    /// no-op success when already active; joins the attempt in progress
    /// when already starting.
    ///
    /// # Errors
    ///
    /// Returns the device or connection error that prevented the start,
    /// or `Cancelled` if a stop arrived first
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Start(tx))
            .await
            .map_err(|_| Error::ControllerGone)?;
        rx.await.map_err(|_| Error::ControllerGone)?
    }

    /// Stop streaming and release everything; safe to call in any state
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Flip between front and back camera
    ///
    /// A running session is stopped and restarted after [`RESTART_DELAY`].
    /// Returns the new facing mode.
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn switch_camera(&self) -> Result<FacingMode> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SwitchCamera(tx))
            .await
            .map_err(|_| Error::ControllerGone)?;
        rx.await.map_err(|_| Error::ControllerGone)
    }

    /// Send a typed message to the assistant
    ///
    /// # Errors
    ///
    /// Returns `NotActive` unless a session is active with an open channel
    pub async fn send_text(&self, content: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SendText(content.into(), tx))
            .await
            .map_err(|_| Error::ControllerGone)?;
        rx.await.map_err(|_| Error::ControllerGone)?
    }

    /// Latest status
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }
}

type StartFuture =
    Pin<Box<dyn Future<Output = std::result::Result<(CaptureStream, Channel), StartError>> + Send>>;

/// A start in progress
struct Pending {
    id: Uuid,
    future: StartFuture,
    output: Arc<dyn OutputDevice>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Pending {
    fn abandon(self) {
        // Dropping the future releases whatever it had acquired
        drop(self.future);
        if let Err(e) = self.output.close() {
            tracing::warn!(error = %e, "failed to close audio output");
        }
        for waiter in self.waiters {
            let _ = waiter.send(Err(Error::Cancelled));
        }
    }
}

/// All resources of an active session
struct Session {
    id: Uuid,
    capture: CaptureStream,
    channel: Channel,
    sampler: FrameSampler,
    encoder: AudioEncoder,
    playback: PlaybackScheduler,
}

impl Session {
    /// Release everything; each step runs regardless of the others
    fn release(mut self) {
        self.sampler.cancel();
        self.encoder.release();
        if let Err(e) = self.playback.output().close() {
            tracing::warn!(session = %self.id, error = %e, "failed to close audio output");
        }
        self.playback.clear();
        self.capture.stop_all_tracks();
        self.channel.close();
        tracing::debug!(
            session = %self.id,
            frames = self.sampler.sent(),
            audio_blocks = self.encoder.sent(),
            rendered = self.playback.rendered(),
            "session released"
        );
    }
}

enum Phase {
    Idle,
    Starting(Pending),
    Active(Session),
}

enum Event {
    Command(Command),
    HandlesDropped,
    Started(std::result::Result<(CaptureStream, Channel), StartError>),
    RestartDue,
    Inbound(Option<Frame>),
    AudioBlock(Option<Vec<f32>>),
    Sampler(SamplerEvent),
    PlaybackStepped,
}

impl From<Option<Command>> for Event {
    fn from(command: Option<Command>) -> Self {
        command.map_or(Self::HandlesDropped, Self::Command)
    }
}

/// Single owner of session state
pub struct SessionController {
    options: SessionOptions,
    backends: Backends,
    phase: Phase,
    camera: CameraModeController,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<StatusSnapshot>,
}

impl SessionController {
    /// Create a controller and its handle; drive it with [`Self::run`]
    #[must_use]
    pub fn new(options: SessionOptions, backends: Backends) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle(options.facing));

        let controller = Self {
            camera: CameraModeController::new(options.facing),
            options,
            backends,
            phase: Phase::Idle,
            commands: command_rx,
            status: status_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    /// Create a controller and run it on a new task
    #[must_use]
    pub fn spawn(options: SessionOptions, backends: Backends) -> SessionHandle {
        let (controller, handle) = Self::new(options, backends);
        tokio::spawn(controller.run());
        handle
    }

    /// Run until every handle has been dropped
    pub async fn run(mut self) {
        tracing::debug!(endpoint = %self.options.endpoint, "session controller running");

        loop {
            match self.next_event().await {
                Event::HandlesDropped => break,
                Event::Command(command) => self.handle_command(command),
                Event::Started(outcome) => self.finish_start(outcome),
                Event::RestartDue => {
                    if matches!(self.phase, Phase::Idle) {
                        tracing::info!(facing = %self.camera.facing(), "restarting with switched camera");
                        self.begin_start(None);
                    }
                }
                Event::Inbound(frame) => self.handle_inbound(frame),
                Event::AudioBlock(Some(block)) => {
                    if let Phase::Active(session) = &mut self.phase {
                        session.encoder.encode_and_send(&block, &session.channel);
                    }
                }
                Event::AudioBlock(None) => {
                    tracing::warn!("microphone stream ended");
                    self.teardown("Microphone disconnected");
                    self.status
                        .send_modify(|s| s.last_error = Some("microphone stream ended".to_string()));
                }
                Event::Sampler(SamplerEvent::Tick) => {
                    if let Phase::Active(session) = &mut self.phase {
                        let open = session.channel.is_open();
                        session.sampler.on_tick(open);
                    }
                }
                Event::Sampler(SamplerEvent::Encoded(result)) => {
                    if let Phase::Active(session) = &mut self.phase {
                        session.sampler.on_encoded(result, &session.channel);
                    }
                }
                Event::PlaybackStepped => {}
            }
        }

        self.camera.cancel_restart();
        self.teardown("Shut down");
        tracing::debug!("session controller stopped");
    }

    async fn next_event(&mut self) -> Event {
        let Self {
            phase,
            camera,
            commands,
            ..
        } = self;

        match phase {
            Phase::Idle => tokio::select! {
                command = commands.recv() => command.into(),
                () = camera.restart_due() => Event::RestartDue,
            },
            Phase::Starting(pending) => tokio::select! {
                command = commands.recv() => command.into(),
                outcome = pending.future.as_mut() => Event::Started(outcome),
                () = camera.restart_due() => Event::RestartDue,
            },
            Phase::Active(session) => {
                let Session {
                    channel,
                    sampler,
                    encoder,
                    playback,
                    ..
                } = session;

                tokio::select! {
                    command = commands.recv() => command.into(),
                    frame = channel.recv() => Event::Inbound(frame),
                    block = encoder.next_block() => Event::AudioBlock(block),
                    event = sampler.next_event() => Event::Sampler(event),
                    () = playback.step() => Event::PlaybackStepped,
                    () = camera.restart_due() => Event::RestartDue,
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => self.begin_start(Some(reply)),
            Command::Stop(reply) => {
                if self.camera.cancel_restart() {
                    tracing::debug!("pending camera restart cancelled");
                }
                self.teardown("Stopped");
                let _ = reply.send(());
            }
            Command::SwitchCamera(reply) => {
                let running = !matches!(self.phase, Phase::Idle);
                if running {
                    self.teardown("Switching camera");
                }
                let facing = self.camera.switch(running);
                tracing::info!(%facing, restart = running, "camera switched");
                self.status.send_modify(|s| s.facing = facing);
                let _ = reply.send(facing);
            }
            Command::SendText(content, reply) => {
                let _ = reply.send(self.send_text(content));
            }
        }
    }

    fn begin_start(&mut self, waiter: Option<oneshot::Sender<Result<()>>>) {
        match &mut self.phase {
            Phase::Active(_) => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
                return;
            }
            Phase::Starting(pending) => {
                pending.waiters.extend(waiter);
                return;
            }
            Phase::Idle => {}
        }

        // Output handle is created inside the user-initiated start
        let output = match self.backends.output.open_output() {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, "failed to open audio output");
                let message = e.to_string();
                self.status.send_modify(|s| {
                    s.status_line = format!("Failed to start: {message}");
                    s.last_error = Some(message);
                });
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(e));
                }
                return;
            }
        };

        let id = Uuid::new_v4();
        let facing = self.camera.facing();
        let constraints = self.options.constraints(facing);
        let endpoint = self.options.endpoint.clone();
        let media = Arc::clone(&self.backends.media);
        let connector = Arc::clone(&self.backends.connector);

        let future: StartFuture = Box::pin(async move {
            let mut capture = media.acquire(&constraints).await?;
            match connector.open(&endpoint).await {
                Ok(channel) => Ok((capture, channel)),
                Err(e) => {
                    capture.stop_all_tracks();
                    Err(e.into())
                }
            }
        });

        tracing::info!(session = %id, %facing, "starting session");
        self.phase = Phase::Starting(Pending {
            id,
            future,
            output,
            waiters: waiter.into_iter().collect(),
        });
        self.status.send_modify(|s| {
            s.state = SessionState::Starting;
            s.facing = facing;
            s.session_id = Some(id);
            s.status_line = "Connecting...".to_string();
            s.last_error = None;
            s.monitoring = None;
        });
    }

    fn finish_start(
        &mut self,
        outcome: std::result::Result<(CaptureStream, Channel), StartError>,
    ) {
        let Phase::Starting(pending) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        let Pending {
            id,
            output,
            waiters,
            ..
        } = pending;

        match outcome {
            Ok((mut capture, channel)) => {
                let session = Session {
                    id,
                    sampler: FrameSampler::start(capture.video()),
                    encoder: AudioEncoder::new(capture.take_audio_blocks()),
                    playback: PlaybackScheduler::new(output),
                    capture,
                    channel,
                };
                tracing::info!(session = %id, endpoint = session.channel.endpoint(), "session active");
                self.phase = Phase::Active(session);
                self.status.send_modify(|s| {
                    s.state = SessionState::Active;
                    s.status_line = "Connected".to_string();
                });
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(err) => {
                tracing::error!(session = %id, error = %err, "session failed to start");
                if let Err(e) = output.close() {
                    tracing::warn!(error = %e, "failed to close audio output");
                }
                let message = err.to_string();
                self.status.send_modify(|s| {
                    s.state = SessionState::Idle;
                    s.session_id = None;
                    s.status_line = format!("Failed to start: {message}");
                    s.last_error = Some(message);
                });
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone().into()));
                }
            }
        }
    }

    /// Release whatever the current phase holds and return to `Idle`
    ///
    /// A no-op when already idle.
    fn teardown(&mut self, reason: &str) {
        let previous = std::mem::replace(&mut self.phase, Phase::Idle);
        if matches!(previous, Phase::Idle) {
            return;
        }

        self.status.send_modify(|s| s.state = SessionState::Stopping);
        match previous {
            Phase::Idle => {}
            Phase::Starting(pending) => {
                tracing::info!(session = %pending.id, reason, "session start abandoned");
                pending.abandon();
            }
            Phase::Active(session) => {
                tracing::info!(session = %session.id, reason, "session stopped");
                session.release();
            }
        }
        self.status.send_modify(|s| {
            s.state = SessionState::Idle;
            s.session_id = None;
            s.status_line = reason.to_string();
            s.monitoring = None;
        });
    }

    fn send_text(&self, content: String) -> Result<()> {
        let Phase::Active(session) = &self.phase else {
            return Err(Error::NotActive);
        };
        if !session.channel.is_open() {
            return Err(Error::NotActive);
        }
        session
            .channel
            .send(OutboundMessage::Text { content }.to_frame()?)?;
        Ok(())
    }

    fn handle_inbound(&mut self, frame: Option<Frame>) {
        let Some(frame) = frame else {
            self.teardown("Disconnected");
            return;
        };
        let Phase::Active(session) = &mut self.phase else {
            return;
        };

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(bytes) => {
                tracing::debug!(len = bytes.len(), "ignoring binary frame from service");
                return;
            }
        };
        let message = match InboundMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unrecognized message");
                return;
            }
        };

        match message {
            InboundMessage::Audio { data } => session.playback.enqueue_and_drain(data),
            InboundMessage::ToolExecuted { tool, result } => {
                let line = protocol::tool_summary(&tool, &result);
                tracing::info!(session = %session.id, %tool, "tool executed");
                self.status.send_modify(|s| {
                    s.status_line = line;
                    s.last_tool = Some(ToolEvent { tool, result });
                });
            }
            InboundMessage::Status { message } => {
                tracing::debug!(%message, "service status");
                self.status.send_modify(|s| s.status_line = message);
            }
            InboundMessage::Error { message } => {
                let err = PeerError { message };
                tracing::warn!(session = %session.id, error = %err, "service reported error");
                self.status.send_modify(|s| {
                    s.status_line = err.to_string();
                    s.last_error = Some(err.message);
                });
            }
            InboundMessage::MonitoringEnabled { context } => {
                tracing::info!(looking_for = ?context, "monitoring enabled");
                self.status.send_modify(|s| {
                    s.status_line = context.as_deref().map_or_else(
                        || "Monitoring".to_string(),
                        |c| format!("Monitoring for {c}"),
                    );
                    s.monitoring = Some(Monitoring { looking_for: context });
                });
            }
            InboundMessage::MonitoringDisabled => {
                tracing::info!("monitoring disabled");
                self.status.send_modify(|s| {
                    s.status_line = "Monitoring stopped".to_string();
                    s.monitoring = None;
                });
            }
            InboundMessage::ItemFound { item } => {
                tracing::info!(item = ?item, "monitored item found");
                self.status.send_modify(|s| {
                    s.status_line = item
                        .as_deref()
                        .map_or_else(|| "Item found".to_string(), |i| format!("Found {i}"));
                    s.monitoring = None;
                });
            }
        }
    }
}
