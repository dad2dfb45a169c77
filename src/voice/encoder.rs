//! Outbound microphone audio
//!
//! Consumes the capture stream's 1024-sample blocks and sends each one as
//! a binary PCM frame the moment it arrives. There is no buffering: a block
//! that arrives while the channel is closed is gone.

use tokio::sync::mpsc;

use crate::protocol;
use crate::transport::Channel;

/// Streams microphone blocks onto the channel
#[derive(Debug)]
pub struct AudioEncoder {
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    sent: u64,
    dropped: u64,
}

impl AudioEncoder {
    /// Consume blocks from a capture stream; `None` for a stream without audio
    #[must_use]
    pub const fn new(blocks: Option<mpsc::Receiver<Vec<f32>>>) -> Self {
        Self {
            blocks,
            sent: 0,
            dropped: 0,
        }
    }

    /// Next captured block
    ///
    /// Returns `None` when the capture source has ended. Pending forever
    /// once released or when there is no audio source.
    pub async fn next_block(&mut self) -> Option<Vec<f32>> {
        match self.blocks.as_mut() {
            Some(blocks) => blocks.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Encode one block and send it if the channel is open
    ///
    /// Returns whether the block was sent.
    pub fn encode_and_send(&mut self, block: &[f32], channel: &Channel) -> bool {
        if !channel.is_open() {
            self.dropped += 1;
            return false;
        }

        match channel.send(protocol::audio_frame(block)) {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(e) => {
                tracing::trace!(error = %e, "audio block dropped");
                self.dropped += 1;
                false
            }
        }
    }

    /// Stop consuming blocks
    pub fn release(&mut self) {
        if let Some(mut blocks) = self.blocks.take() {
            blocks.close();
            tracing::debug!(sent = self.sent, dropped = self.dropped, "audio encoder released");
        }
    }

    /// Whether blocks are still being consumed
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.blocks.is_some()
    }

    /// Blocks sent so far
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Blocks dropped because the channel was closed
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
