use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::PusherFrame;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{RealtimeTransport, TransportState};

const EVENT_BUFFER: usize = 256;

/// WebSocket connection to the Kahla pusher. Decoded frames are forwarded to
/// the receiver handed out by [`PusherSocket::new`].
pub struct PusherSocket {
    state: watch::Sender<TransportState>,
    frames: mpsc::Sender<PusherFrame>,
}

impl PusherSocket {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<PusherFrame>) {
        let (frames, frames_rx) = mpsc::channel(EVENT_BUFFER);
        let (state, _) = watch::channel(TransportState::Disconnected);
        (Arc::new(Self { state, frames }), frames_rx)
    }

    fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    async fn forward_text(&self, text: &str) {
        match PusherFrame::parse(text) {
            Ok(frame) => {
                debug!(kind = frame.kind, "pusher frame received");
                if self.frames.send(frame).await.is_err() {
                    debug!("pusher frame dropped; no event consumer");
                }
            }
            Err(err) => warn!(error = %err, "ignoring pusher message that is not an event frame"),
        }
    }
}

#[async_trait]
impl RealtimeTransport for PusherSocket {
    async fn connect(&self, address: &str, shutdown: CancellationToken) -> Result<()> {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => {
                self.set_state(TransportState::Closed);
                return Ok(());
            }
            connected = connect_async(address) => connected,
        };
        let (ws_stream, _) = match connected {
            Ok(connected) => connected,
            Err(err) => {
                self.set_state(TransportState::Disconnected);
                return Err(err).with_context(|| format!("failed to connect pusher: {address}"));
            }
        };
        self.set_state(TransportState::Connected);
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(err) = ws_writer.send(Message::Close(None)).await {
                        debug!(error = %err, "pusher close frame not delivered");
                    }
                    self.set_state(TransportState::Closed);
                    info!("pusher connection closed on request");
                    return Ok(());
                }
                msg = ws_reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.forward_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => {
                        self.set_state(TransportState::Disconnected);
                        return Err(anyhow!("pusher connection closed by server"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        self.set_state(TransportState::Disconnected);
                        return Err(err).context("pusher receive failed");
                    }
                },
            }
        }
    }

    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/pusher_tests.rs"]
mod tests;
