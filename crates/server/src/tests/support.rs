use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use client_core::{ChatServiceClient, RealtimeTransport, TransportState};
use message_cipher::CryptoJsAes;
use relay_core::{ConversationRegistry, RelayService, RetryPolicy};
use shared::{
    domain::{Conversation, ConversationId, FriendRequestId},
    protocol::{FriendRequest, FriendSummary},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct FakeChat {
    pub(crate) sent: Mutex<Vec<(ConversationId, String)>>,
    pub(crate) fail_sends: AtomicBool,
    pub(crate) panic_on_login: AtomicBool,
}

impl FakeChat {
    pub(crate) fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatServiceClient for FakeChat {
    async fn login(&self, _email: &str, _password: &str) -> Result<()> {
        if self.panic_on_login.load(Ordering::SeqCst) {
            panic!("login blew up");
        }
        Ok(())
    }

    async fn init_pusher(&self) -> Result<String> {
        Ok("wss://pusher.test".to_string())
    }

    async fn my_friends(&self, _order_by_name: bool) -> Result<Vec<FriendSummary>> {
        Ok(Vec::new())
    }

    async fn my_requests(&self) -> Result<Vec<FriendRequest>> {
        Ok(Vec::new())
    }

    async fn complete_request(&self, _request_id: FriendRequestId, _accept: bool) -> Result<()> {
        Ok(())
    }

    async fn send_message(&self, conversation_id: ConversationId, ciphertext: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("chat server unreachable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id, ciphertext.to_string()));
        Ok(())
    }
}

/// Transport that comes up immediately and stays up until shutdown.
pub(crate) struct StableTransport {
    state: watch::Sender<TransportState>,
}

impl StableTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (state, _) = watch::channel(TransportState::Disconnected);
        Arc::new(Self { state })
    }
}

#[async_trait]
impl RealtimeTransport for StableTransport {
    async fn connect(&self, _address: &str, shutdown: CancellationToken) -> Result<()> {
        self.state.send_replace(TransportState::Connected);
        shutdown.cancelled().await;
        self.state.send_replace(TransportState::Closed);
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

pub(crate) const CONVERSATION_KEY: &str = "conversation-key";

/// Relay whose only conversation (id 1) holds `token`.
pub(crate) fn relay_with_token(chat: &Arc<FakeChat>, token: &str) -> Arc<RelayService> {
    let mut conversation = Conversation::new(ConversationId(1), "peer", CONVERSATION_KEY);
    conversation.token = token.to_string();
    RelayService::with_registry(
        Arc::clone(chat) as Arc<dyn ChatServiceClient>,
        Arc::new(CryptoJsAes),
        RetryPolicy::immediate(2),
        ConversationRegistry::with_conversations(vec![conversation]),
    )
}
