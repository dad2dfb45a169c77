//! WebSocket connector
//!
//! One task writes queued frames to the socket, another forwards socket
//! messages into the inbound queue. Either task finishing stops the other,
//! so both socket halves are released and the client sees the channel end.

use std::fmt;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{Channel, Connector, Frame};
use crate::error::ConnectionError;

/// Opens channels over `ws`/`wss`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &Url) -> Result<Channel, ConnectionError> {
        tracing::debug!(endpoint = %endpoint, "opening websocket");

        let (socket, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| ConnectionError::Open(e.to_string()))?;
        let (sink, stream) = socket.split();

        tracing::info!(endpoint = %endpoint, "websocket connected");
        Ok(spawn_pumps(sink, stream, endpoint.as_str()))
    }
}

/// Pump a message sink and stream through a [`Channel`]
fn spawn_pumps<Si, St, E>(mut sink: Si, mut stream: St, endpoint: &str) -> Channel
where
    Si: Sink<Message> + Send + Unpin + 'static,
    Si::Error: fmt::Display,
    St: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

    // Each task drops its sender on exit, which wakes the other
    let (writer_done, mut writer_stopped) = oneshot::channel::<()>();
    let (reader_done, mut reader_stopped) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let _writer_done = writer_done;
        loop {
            let frame = tokio::select! {
                frame = out_rx.recv() => frame,
                _ = &mut reader_stopped => {
                    tracing::debug!("websocket reader ended, stopping writer");
                    break;
                }
            };
            let Some(frame) = frame else {
                break;
            };
            let message = match frame {
                Frame::Text(text) => Message::Text(text.into()),
                Frame::Binary(bytes) => Message::Binary(bytes.into()),
            };
            if let Err(e) = sink.send(message).await {
                tracing::debug!(error = %e, "websocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        let _reader_done = reader_done;
        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                _ = &mut writer_stopped => {
                    tracing::debug!("websocket writer ended, stopping reader");
                    break;
                }
            };
            let frame = match message {
                Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_string()),
                Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes.to_vec()),
                Some(Ok(Message::Close(reason))) => {
                    tracing::debug!(?reason, "websocket closed by peer");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket read failed");
                    break;
                }
                None => break,
            };
            if in_tx.send(frame).is_err() {
                break;
            }
        }
    });

    Channel::new(out_tx, in_rx, endpoint)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use futures::channel::mpsc as socket;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    type PeerStream = futures::stream::Map<
        socket::UnboundedReceiver<Message>,
        fn(Message) -> Result<Message, io::Error>,
    >;

    /// Socket halves whose far ends the test holds
    fn fake_socket() -> (
        socket::UnboundedSender<Message>,
        socket::UnboundedReceiver<Message>,
        socket::UnboundedSender<Message>,
        PeerStream,
    ) {
        let (sink, sent) = socket::unbounded();
        let (incoming, stream) = socket::unbounded();
        let stream: PeerStream = stream.map(Ok as fn(Message) -> Result<Message, io::Error>);
        (sink, sent, incoming, stream)
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (sink, mut sent, incoming, stream) = fake_socket();
        let mut channel = spawn_pumps(sink, stream, "ws://test/ws/vision");

        channel.send(Frame::Binary(vec![1, 2])).unwrap();
        assert_eq!(sent.next().await, Some(Message::Binary(vec![1_u8, 2].into())));

        incoming
            .unbounded_send(Message::Text("hello".to_string().into()))
            .unwrap();
        assert_eq!(channel.recv().await, Some(Frame::Text("hello".to_string())));
    }

    #[tokio::test]
    async fn test_client_close_releases_silent_peer() {
        let (sink, _sent, incoming, stream) = fake_socket();
        let mut channel = spawn_pumps(sink, stream, "ws://test/ws/vision");

        // The peer never answers; the read half must still be released
        channel.close();
        tokio::time::timeout(WAIT, async {
            while !incoming.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("read half still held after close");
    }

    #[tokio::test]
    async fn test_write_failure_ends_channel() {
        let (sink, sent, _incoming, stream) = fake_socket();
        drop(sent);
        let mut channel = spawn_pumps(sink, stream, "ws://test/ws/vision");

        channel.send(Frame::Text("lost".to_string())).unwrap();
        let next = tokio::time::timeout(WAIT, channel.recv())
            .await
            .expect("channel stayed up after write failure");
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_peer_close_ends_channel() {
        let (sink, mut sent, incoming, stream) = fake_socket();
        let mut channel = spawn_pumps(sink, stream, "ws://test/ws/vision");

        incoming.unbounded_send(Message::Close(None)).unwrap();
        assert_eq!(channel.recv().await, None);

        // Writer stopped too and closed its half
        let closed = tokio::time::timeout(WAIT, sent.next())
            .await
            .expect("write half still open after peer close");
        assert_eq!(closed, None);
    }
}
