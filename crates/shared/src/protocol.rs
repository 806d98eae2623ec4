use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ConversationId, FriendRequestId};

pub const NEW_MESSAGE_EVENT: i64 = 0;
pub const NEW_FRIEND_REQUEST_EVENT: i64 = 1;
pub const WERE_DELETED_EVENT: i64 = 2;
pub const FRIEND_ACCEPTED_EVENT: i64 = 3;
pub const TIMER_UPDATED_EVENT: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KahlaUser {
    pub id: String,
    #[serde(default)]
    pub nick_name: String,
}

/// Entry of the `MyFriends` listing: one conversation the account can post to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendSummary {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub aes_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: FriendRequestId,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub creator: Option<KahlaUser>,
}

impl FriendRequest {
    pub fn creator_name(&self) -> &str {
        self.creator
            .as_ref()
            .map(|creator| creator.nick_name.as_str())
            .unwrap_or_default()
    }
}

/// Raw pusher message: the numeric `type` tag plus the rest of the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherFrame {
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PusherFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub conversation_id: ConversationId,
    pub sender: KahlaUser,
    pub content: String,
    pub aes_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFriendRequestEvent {
    pub requester: KahlaUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WereDeletedEvent {
    pub trigger: KahlaUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendAcceptedEvent {
    pub target: KahlaUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdatedEvent {
    pub conversation_id: ConversationId,
    pub new_timer: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PusherEvent {
    NewMessage(NewMessageEvent),
    NewFriendRequest(NewFriendRequestEvent),
    WereDeleted(WereDeletedEvent),
    FriendAccepted(FriendAcceptedEvent),
    TimerUpdated(TimerUpdatedEvent),
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unrecognized pusher event type {0}")]
    UnknownKind(i64),
    #[error("malformed payload for pusher event type {kind}: {source}")]
    Malformed {
        kind: i64,
        source: serde_json::Error,
    },
}

fn decode<T: DeserializeOwned>(kind: i64, payload: Map<String, Value>) -> Result<T, EventDecodeError> {
    serde_json::from_value(Value::Object(payload))
        .map_err(|source| EventDecodeError::Malformed { kind, source })
}

impl TryFrom<PusherFrame> for PusherEvent {
    type Error = EventDecodeError;

    fn try_from(frame: PusherFrame) -> Result<Self, Self::Error> {
        let PusherFrame { kind, payload } = frame;
        match kind {
            NEW_MESSAGE_EVENT => decode(kind, payload).map(PusherEvent::NewMessage),
            NEW_FRIEND_REQUEST_EVENT => decode(kind, payload).map(PusherEvent::NewFriendRequest),
            WERE_DELETED_EVENT => decode(kind, payload).map(PusherEvent::WereDeleted),
            FRIEND_ACCEPTED_EVENT => decode(kind, payload).map(PusherEvent::FriendAccepted),
            TIMER_UPDATED_EVENT => decode(kind, payload).map(PusherEvent::TimerUpdated),
            other => Err(EventDecodeError::UnknownKind(other)),
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
