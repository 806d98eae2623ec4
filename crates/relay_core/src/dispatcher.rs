use std::sync::Arc;

use message_cipher::MessageCipher;
use shared::protocol::{EventDecodeError, NewMessageEvent, PusherEvent, PusherFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{error::RelayError, relay::RelayService};

/// Plaintext a peer sends to have its conversation token replaced.
pub const REFRESH_TOKEN_COMMAND: &str = "refresh token";

/// Consumes pusher frames and turns them into relay actions.
pub struct EventDispatcher {
    relay: Arc<RelayService>,
    cipher: Arc<dyn MessageCipher>,
    frames: mpsc::Receiver<PusherFrame>,
}

impl EventDispatcher {
    pub fn new(
        relay: Arc<RelayService>,
        cipher: Arc<dyn MessageCipher>,
        frames: mpsc::Receiver<PusherFrame>,
    ) -> Self {
        Self {
            relay,
            cipher,
            frames,
        }
    }

    /// Runs until shutdown. A frame with an unrecognized type ends the loop
    /// with [`RelayError::ProtocolViolation`].
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), RelayError> {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("event dispatcher stopped");
                    return Ok(());
                }
                frame = self.frames.recv() => frame,
            };

            let Some(frame) = frame else {
                info!("pusher event stream closed; waiting for shutdown");
                shutdown.cancelled().await;
                return Ok(());
            };

            match PusherEvent::try_from(frame) {
                Ok(event) => self.dispatch(event).await,
                Err(EventDecodeError::UnknownKind(kind)) => {
                    error!(kind, "pusher sent an unrecognized event type");
                    return Err(RelayError::ProtocolViolation { kind });
                }
                Err(err) => warn!(error = %err, "skipping malformed pusher event"),
            }
        }
    }

    pub async fn dispatch(&self, event: PusherEvent) {
        match event {
            PusherEvent::NewMessage(message) => self.on_new_message(message).await,
            PusherEvent::NewFriendRequest(event) => {
                info!(
                    requester_id = %event.requester.id,
                    nick_name = %event.requester.nick_name,
                    "new friend request"
                );
                self.relay.trigger_friend_acceptance();
            }
            PusherEvent::WereDeleted(event) => {
                info!(
                    trigger_id = %event.trigger.id,
                    nick_name = %event.trigger.nick_name,
                    "removed from a friend list"
                );
                self.relay.trigger_conversation_refresh();
            }
            PusherEvent::FriendAccepted(event) => info!(
                target_id = %event.target.id,
                nick_name = %event.target.nick_name,
                "friend request accepted by peer"
            ),
            PusherEvent::TimerUpdated(event) => info!(
                conversation_id = %event.conversation_id,
                new_timer = event.new_timer,
                "self-destruct timer updated"
            ),
        }
    }

    async fn on_new_message(&self, message: NewMessageEvent) {
        let conversation_id = message.conversation_id;
        let content = match self.cipher.decrypt(&message.content, &message.aes_key) {
            Ok(content) => content,
            Err(err) => {
                warn!(%conversation_id, error = %err, "could not decrypt incoming message");
                return;
            }
        };
        info!(
            %conversation_id,
            sender = %message.sender.nick_name,
            %content,
            "new message"
        );

        if content != REFRESH_TOKEN_COMMAND {
            return;
        }
        if self.relay.revoke_token(conversation_id).await {
            info!(%conversation_id, "token refresh requested");
            self.relay.trigger_token_issuance();
        } else {
            warn!(%conversation_id, "token refresh requested for unknown conversation");
            self.relay.trigger_conversation_refresh();
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
