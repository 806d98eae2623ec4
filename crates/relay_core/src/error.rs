use shared::{domain::ConversationId, error::ResponseCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("login failed (attempt {attempt}): {cause}")]
    AuthenticationFailure { attempt: u32, cause: String },
    #[error("pusher initialization failed (attempt {attempt}): {cause}")]
    PusherInitFailure { attempt: u32, cause: String },
    #[error("pusher connection failed (attempt {attempt}): {cause}")]
    TransportConnectFailure { attempt: u32, cause: String },
    #[error("access token not found")]
    TokenNotFound,
    #[error("message content is required")]
    ContentMissing,
    #[error("conversation {0} has no cipher key")]
    MissingCipherKey(ConversationId),
    #[error("send message failed: {0}")]
    MessageSendFailure(String),
    #[error("friend list unavailable: {0}")]
    FriendListUnavailable(String),
    #[error("token issuance failed for {failed} conversation(s)")]
    TokenIssuanceIncomplete { failed: usize },
    #[error("friend request acceptance failed for {failed} request(s)")]
    FriendRequestsIncomplete { failed: usize },
    #[error("pusher sent unrecognized event type {kind}")]
    ProtocolViolation { kind: i64 },
}

impl RelayError {
    /// Client-facing classification used by the HTTP surface.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            RelayError::TokenNotFound => ResponseCode::InvalidAccessToken,
            RelayError::ContentMissing => ResponseCode::NoContent,
            _ => ResponseCode::SendMessageFailed,
        }
    }
}
