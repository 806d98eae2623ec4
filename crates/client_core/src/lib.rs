use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ConversationId, FriendRequestId},
    protocol::{FriendRequest, FriendSummary},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

mod kahla;
mod pusher;

pub use kahla::{KahlaClient, DEFAULT_SERVER_URL};
pub use pusher::PusherSocket;

/// REST side of the chat service, as used by the relay.
#[async_trait]
pub trait ChatServiceClient: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<()>;
    /// Returns the address of the real-time endpoint for the current session.
    async fn init_pusher(&self) -> Result<String>;
    async fn my_friends(&self, order_by_name: bool) -> Result<Vec<FriendSummary>>;
    async fn my_requests(&self) -> Result<Vec<FriendRequest>>;
    async fn complete_request(&self, request_id: FriendRequestId, accept: bool) -> Result<()>;
    async fn send_message(&self, conversation_id: ConversationId, ciphertext: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Closed,
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Opens the connection and blocks until it ends.
    ///
    /// Returns `Ok(())` with state `Closed` when `shutdown` fires. Any other
    /// end of the connection leaves the state `Disconnected` and returns an
    /// error.
    async fn connect(&self, address: &str, shutdown: CancellationToken) -> Result<()>;
    fn state(&self) -> TransportState;
    fn subscribe_state(&self) -> watch::Receiver<TransportState>;
}
