//! In-memory collaborators for the relay core tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use client_core::{ChatServiceClient, RealtimeTransport, TransportState};
use message_cipher::{CryptoJsAes, MessageCipher};
use shared::{
    domain::{ConversationId, FriendRequestId},
    protocol::{FriendRequest, FriendSummary},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{relay::RelayService, retry::RetryPolicy};

pub const PUSHER_ADDRESS: &str = "wss://pusher.test/session";

#[derive(Default)]
pub struct FakeChatClient {
    pub friends: Mutex<Vec<FriendSummary>>,
    pub requests: Mutex<Vec<FriendRequest>>,
    pub sent: Mutex<Vec<(ConversationId, String)>>,
    pub completed: Mutex<Vec<FriendRequestId>>,
    pub login_calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub friend_list_calls: AtomicUsize,
    /// Number of upcoming logins that fail.
    pub login_failures: AtomicU32,
    pub init_failures: AtomicU32,
    pub fail_sends: AtomicBool,
    pub fail_friend_list: AtomicBool,
    pub friend_list_delay: Mutex<Option<Duration>>,
}

impl FakeChatClient {
    pub fn with_friends(friends: Vec<FriendSummary>) -> Arc<Self> {
        let client = Self::default();
        *client.friends.lock().unwrap() = friends;
        Arc::new(client)
    }

    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChatServiceClient for FakeChatClient {
    async fn login(&self, _email: &str, _password: &str) -> Result<()> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.login_failures) {
            bail!("wrong password");
        }
        Ok(())
    }

    async fn init_pusher(&self) -> Result<String> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.init_failures) {
            bail!("pusher unavailable");
        }
        Ok(PUSHER_ADDRESS.to_string())
    }

    async fn my_friends(&self, _order_by_name: bool) -> Result<Vec<FriendSummary>> {
        self.friend_list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.friend_list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_friend_list.load(Ordering::SeqCst) {
            bail!("friend list unavailable");
        }
        Ok(self.friends.lock().unwrap().clone())
    }

    async fn my_requests(&self) -> Result<Vec<FriendRequest>> {
        Ok(self.requests.lock().unwrap().clone())
    }

    async fn complete_request(&self, request_id: FriendRequestId, accept: bool) -> Result<()> {
        if !accept {
            bail!("only accepting is expected");
        }
        if request_id.0 < 0 {
            bail!("request {request_id} not found");
        }
        self.completed.lock().unwrap().push(request_id);
        Ok(())
    }

    async fn send_message(&self, conversation_id: ConversationId, ciphertext: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("conversation {conversation_id} rejected the message"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id, ciphertext.to_string()));
        Ok(())
    }
}

/// How one call to [`FakeTransport::connect`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    /// Fails before the connection comes up.
    Refuse,
    /// Comes up, then drops.
    DropAfterConnect,
    /// Comes up and stays up until shutdown.
    HoldUntilShutdown,
}

pub struct FakeTransport {
    state: watch::Sender<TransportState>,
    script: Mutex<VecDeque<ConnectScript>>,
    pub addresses: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn scripted(script: impl IntoIterator<Item = ConnectScript>) -> Arc<Self> {
        let (state, _) = watch::channel(TransportState::Disconnected);
        Arc::new(Self {
            state,
            script: Mutex::new(script.into_iter().collect()),
            addresses: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_calls(&self) -> usize {
        self.addresses.lock().unwrap().len()
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(&self, address: &str, shutdown: CancellationToken) -> Result<()> {
        self.addresses.lock().unwrap().push(address.to_string());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectScript::HoldUntilShutdown);
        match step {
            ConnectScript::Refuse => {
                self.state.send_replace(TransportState::Disconnected);
                bail!("connection refused")
            }
            ConnectScript::DropAfterConnect => {
                self.state.send_replace(TransportState::Connected);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.state.send_replace(TransportState::Disconnected);
                bail!("connection reset")
            }
            ConnectScript::HoldUntilShutdown => {
                self.state.send_replace(TransportState::Connected);
                shutdown.cancelled().await;
                self.state.send_replace(TransportState::Closed);
                Ok(())
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

pub fn friend(id: i64, key: &str) -> FriendSummary {
    FriendSummary {
        conversation_id: ConversationId(id),
        user_id: Some(format!("user-{id}")),
        aes_key: (!key.is_empty()).then(|| key.to_string()),
        display_name: None,
    }
}

pub fn relay_with(client: Arc<FakeChatClient>) -> Arc<RelayService> {
    RelayService::new(client, Arc::new(CryptoJsAes), RetryPolicy::immediate(2))
}

pub fn decrypt(ciphertext: &str, key: &str) -> String {
    CryptoJsAes.decrypt(ciphertext, key).expect("ciphertext decrypts")
}

pub fn encrypt(plaintext: &str, key: &str) -> String {
    CryptoJsAes.encrypt(plaintext, key).expect("plaintext encrypts")
}

/// Waits until the background tasks spawned so far have settled.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
