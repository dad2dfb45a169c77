//! In-process transport
//!
//! Pairs a [`MemoryConnector`] with a [`MemoryListener`]. Every successful
//! `open` hands the listener a [`PeerEnd`] that plays the service side.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::{Channel, Connector, Frame};
use crate::error::ConnectionError;
use crate::protocol::InboundMessage;

/// Create a connected connector/listener pair
#[must_use]
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let opens = Arc::new(AtomicUsize::new(0));
    (
        MemoryConnector {
            peers: tx,
            opens: Arc::clone(&opens),
        },
        MemoryListener { incoming: rx },
    )
}

/// Connector whose channels terminate in the paired listener
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<PeerEnd>,
    opens: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Number of open attempts, successful or not
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Url) -> Result<Channel, ConnectionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();

        let peer = PeerEnd {
            endpoint: endpoint.to_string(),
            to_client: Some(to_client),
            from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| ConnectionError::Open(format!("nothing listening on {endpoint}")))?;

        Ok(Channel::new(to_peer, from_peer, endpoint.as_str()))
    }
}

/// Accepts the peer side of each opened channel
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<PeerEnd>,
}

impl MemoryListener {
    /// Wait for the next client to connect
    pub async fn accept(&mut self) -> Option<PeerEnd> {
        self.incoming.recv().await
    }
}

/// Service side of an in-memory channel
#[derive(Debug)]
pub struct PeerEnd {
    endpoint: String,
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl PeerEnd {
    /// Endpoint the client asked for
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a frame to the client; false if the client is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Send a protocol message as a text frame
    pub fn send_message(&self, message: &InboundMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send(Frame::Text(text)),
            Err(_) => false,
        }
    }

    /// Next frame from the client; `None` once the client has closed
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Frame already waiting, if any
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client still holds its end
    #[must_use]
    pub fn client_connected(&self) -> bool {
        self.to_client.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Close from the service side
    pub fn close(&mut self) {
        self.to_client = None;
        self.from_client.close();
    }
}
