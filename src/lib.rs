//! Aiva client - real-time streaming client for a multimodal AI assistant
//!
//! This library provides the client side of a live assistant session:
//! - Camera and microphone capture
//! - Frame sampling and PCM audio streaming over a bidirectional channel
//! - Ordered playback of the assistant's synthesized speech
//! - Session lifecycle with front/back camera switching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  SessionController                   │
//! │  start/stop  │  camera switch  │  inbound dispatch  │
//! └───────┬──────────────┬──────────────────┬───────────┘
//!         │              │                  │
//! ┌───────▼──────┐ ┌─────▼───────┐ ┌────────▼──────────┐
//! │ FrameSampler │ │AudioEncoder │ │ PlaybackScheduler │
//! │  1 Hz JPEG   │ │ 16 kHz PCM  │ │    24 kHz PCM     │
//! └───────┬──────┘ └─────┬───────┘ └────────▲──────────┘
//!         │              │                  │
//! ┌───────▼──────────────▼──────────────────┴───────────┐
//! │           Channel (WebSocket /ws/vision)            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod captures;
pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod vision;
pub mod voice;

pub use captures::{Capture, CapturesClient};
pub use config::Config;
pub use error::{ConnectionError, DecodeError, DeviceError, Error, PeerError, Result, StartError};
pub use media::{CaptureStream, FacingMode, MediaConstraints, MediaDevice, SystemMedia};
pub use protocol::{InboundMessage, OutboundMessage};
pub use session::{
    Backends, SessionController, SessionHandle, SessionOptions, SessionState, StatusSnapshot,
};
pub use transport::{Channel, Connector, Frame, WsConnector};
