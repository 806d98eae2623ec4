use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ConversationId);
id_newtype!(FriendRequestId);

/// One chat thread reachable through the relay's session.
///
/// `token` is empty while no relay credential has been issued for the
/// conversation. `aes_key` is empty when the chat service never supplied one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub user_id: String,
    pub aes_key: String,
    pub token: String,
}

impl Conversation {
    pub fn new(
        conversation_id: ConversationId,
        user_id: impl Into<String>,
        aes_key: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            user_id: user_id.into(),
            aes_key: aes_key.into(),
            token: String::new(),
        }
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn has_cipher_key(&self) -> bool {
        !self.aes_key.is_empty()
    }
}
