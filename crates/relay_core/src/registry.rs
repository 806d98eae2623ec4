use std::{collections::HashSet, sync::Arc};

use shared::{
    domain::{Conversation, ConversationId},
    protocol::FriendSummary,
};
use tokio::sync::RwLock;

use crate::error::RelayError;

/// Immutable view of the registry at one point in time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversationTable {
    entries: Vec<Conversation>,
}

impl ConversationTable {
    pub fn new(entries: Vec<Conversation>) -> Self {
        let mut table = Self::default();
        let mut seen = HashSet::new();
        let mut tokens = HashSet::new();
        for mut conversation in entries {
            if !seen.insert(conversation.conversation_id) {
                continue;
            }
            if conversation.has_token() && !tokens.insert(conversation.token.clone()) {
                conversation.token.clear();
            }
            table.entries.push(conversation);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.entries.iter()
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.entries
            .iter()
            .find(|conversation| conversation.conversation_id == conversation_id)
    }

    fn get_mut(&mut self, conversation_id: ConversationId) -> Option<&mut Conversation> {
        self.entries
            .iter_mut()
            .find(|conversation| conversation.conversation_id == conversation_id)
    }

    /// The empty token never resolves.
    pub fn by_token(&self, token: &str) -> Option<&Conversation> {
        if token.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|conversation| conversation.token == token)
    }

    /// Builds the table that follows a friend-list sync: known conversations
    /// are carried over with their token, unknown ones start without one.
    fn merged_with(&self, friends: &[FriendSummary]) -> (ConversationTable, usize) {
        let mut entries = Vec::with_capacity(friends.len());
        let mut seen = HashSet::new();
        let mut added = 0;
        for friend in friends {
            if !seen.insert(friend.conversation_id) {
                continue;
            }
            let remote_key = friend.aes_key.clone().unwrap_or_default();
            match self.get(friend.conversation_id) {
                Some(existing) => {
                    let mut kept = existing.clone();
                    if !kept.has_cipher_key() {
                        kept.aes_key = remote_key;
                    }
                    entries.push(kept);
                }
                None => {
                    added += 1;
                    entries.push(Conversation::new(
                        friend.conversation_id,
                        friend.user_id.clone().unwrap_or_default(),
                        remote_key,
                    ));
                }
            }
        }
        (ConversationTable { entries }, added)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub removed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAssignment {
    Assigned,
    AlreadyIssued,
    TokenInUse,
    UnknownConversation,
}

/// Token ↔ conversation table shared by the HTTP surface and the background
/// tasks. Every write installs a new table, so a snapshot taken by a reader
/// never changes underneath it.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    current: RwLock<Arc<ConversationTable>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(entries: Vec<Conversation>) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConversationTable::new(entries))),
        }
    }

    pub async fn snapshot(&self) -> Arc<ConversationTable> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn get(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.current.read().await.get(conversation_id).cloned()
    }

    pub async fn resolve(&self, token: &str) -> Result<Conversation, RelayError> {
        self.current
            .read()
            .await
            .by_token(token)
            .cloned()
            .ok_or(RelayError::TokenNotFound)
    }

    pub async fn without_token(&self) -> Vec<Conversation> {
        self.current
            .read()
            .await
            .iter()
            .filter(|conversation| !conversation.has_token())
            .cloned()
            .collect()
    }

    /// Replaces the whole table with the merge of the current one and
    /// `friends`. Conversations missing from `friends` are dropped.
    pub async fn replace_from_friends(&self, friends: &[FriendSummary]) -> MergeOutcome {
        let mut current = self.current.write().await;
        let (next, added) = current.merged_with(friends);
        let removed = current.len() + added - next.len();
        let outcome = MergeOutcome {
            added,
            removed,
            total: next.len(),
        };
        *current = Arc::new(next);
        outcome
    }

    pub async fn assign_token(
        &self,
        conversation_id: ConversationId,
        token: &str,
    ) -> TokenAssignment {
        let mut current = self.current.write().await;
        match current.get(conversation_id) {
            None => return TokenAssignment::UnknownConversation,
            Some(conversation) if conversation.has_token() => {
                return TokenAssignment::AlreadyIssued
            }
            Some(_) => {}
        }
        if current.by_token(token).is_some() {
            return TokenAssignment::TokenInUse;
        }
        if let Some(conversation) = Arc::make_mut(&mut current).get_mut(conversation_id) {
            conversation.token = token.to_string();
        }
        TokenAssignment::Assigned
    }

    /// Clears the token of `conversation_id`. Returns `false` when the
    /// conversation is unknown.
    pub async fn clear_token(&self, conversation_id: ConversationId) -> bool {
        let mut current = self.current.write().await;
        if current.get(conversation_id).is_none() {
            return false;
        }
        if let Some(conversation) = Arc::make_mut(&mut current).get_mut(conversation_id) {
            conversation.token.clear();
        }
        true
    }

    /// Clears the token only if it is still `expected`.
    pub async fn revoke_token(&self, conversation_id: ConversationId, expected: &str) -> bool {
        let mut current = self.current.write().await;
        let matches = current
            .get(conversation_id)
            .is_some_and(|conversation| conversation.has_token() && conversation.token == expected);
        if !matches {
            return false;
        }
        if let Some(conversation) = Arc::make_mut(&mut current).get_mut(conversation_id) {
            conversation.token.clear();
        }
        true
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
