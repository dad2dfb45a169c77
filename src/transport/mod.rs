//! Bidirectional message channel to the assistant service
//!
//! A [`Channel`] is a pair of in-process queues. Whatever actually moves
//! the frames (a WebSocket, an in-memory peer) sits behind a [`Connector`]
//! and pumps those queues from its own tasks.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ConnectionError;
use crate::{Error, Result};

pub use memory::{MemoryConnector, MemoryListener, PeerEnd, memory_transport};
pub use websocket::WsConnector;

/// Path of the streaming endpoint on the service
pub const VISION_PATH: &str = "/ws/vision";

/// A single message on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Client side of an open channel
#[derive(Debug)]
pub struct Channel {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    inbound: mpsc::UnboundedReceiver<Frame>,
    endpoint: String,
}

impl Channel {
    /// Wrap the client ends of the two frame queues
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<Frame>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            endpoint: endpoint.into(),
        }
    }

    /// Whether frames can still be sent
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a frame for the peer
    ///
    /// # Errors
    ///
    /// Returns error if the channel has been closed by either side
    pub fn send(&self, frame: Frame) -> std::result::Result<(), ConnectionError> {
        self.outbound
            .as_ref()
            .ok_or(ConnectionError::Closed)?
            .send(frame)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Next frame from the peer; `None` once the peer side has gone away
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    /// Close the channel
    ///
    /// Anything the peer sent but was not yet received is discarded.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            tracing::debug!(endpoint = %self.endpoint, "channel closed");
        }
        self.inbound.close();
        while self.inbound.try_recv().is_ok() {}
    }

    /// Endpoint this channel was opened against
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Opens channels to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the channel cannot be established
    async fn open(&self, endpoint: &Url) -> std::result::Result<Channel, ConnectionError>;
}

/// Derive the streaming endpoint from the service base URL
///
/// A secure base (`https`) yields `wss`, plain `http` yields `ws`.
///
/// # Errors
///
/// Returns error if the base URL uses any other scheme
pub fn vision_endpoint(base: &Url) -> Result<Url> {
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::Config(format!(
                "unsupported server scheme {other:?}, expected http or https"
            )));
        }
    };

    let mut endpoint = base.clone();
    endpoint
        .set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use scheme {scheme} for {base}")))?;
    endpoint.set_path(VISION_PATH);
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    Ok(endpoint)
}
