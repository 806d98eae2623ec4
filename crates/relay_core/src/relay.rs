use std::sync::Arc;

use client_core::ChatServiceClient;
use message_cipher::MessageCipher;
use rand::{distributions::Alphanumeric, Rng};
use shared::domain::{Conversation, ConversationId};
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    registry::{ConversationRegistry, MergeOutcome, TokenAssignment},
    retry::RetryPolicy,
    task_gate::TaskGate,
};

pub const TOKEN_LENGTH: usize = 32;
const TOKEN_GENERATION_ATTEMPTS: usize = 8;

/// Background operations that run at most once at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundTask {
    AcceptFriendRequests,
    RefreshConversations,
    IssueTokens,
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Owns the conversation registry and everything that talks to the chat
/// service on its behalf.
pub struct RelayService {
    client: Arc<dyn ChatServiceClient>,
    cipher: Arc<dyn MessageCipher>,
    registry: ConversationRegistry,
    tasks: TaskGate<BackgroundTask>,
    retry: RetryPolicy,
}

impl RelayService {
    pub fn new(
        client: Arc<dyn ChatServiceClient>,
        cipher: Arc<dyn MessageCipher>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        Self::with_registry(client, cipher, retry, ConversationRegistry::new())
    }

    pub fn with_registry(
        client: Arc<dyn ChatServiceClient>,
        cipher: Arc<dyn MessageCipher>,
        retry: RetryPolicy,
        registry: ConversationRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            cipher,
            registry,
            tasks: TaskGate::new(),
            retry,
        })
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn ChatServiceClient> {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_running(&self, task: BackgroundTask) -> bool {
        self.tasks.is_running(&task)
    }

    /// Synchronizes the registry with the chat service's friend list.
    pub async fn refresh_from_friend_list(self: &Arc<Self>) -> Result<MergeOutcome, RelayError> {
        let friends = self
            .client
            .my_friends(false)
            .await
            .map_err(|err| RelayError::FriendListUnavailable(format!("{err:#}")))?;

        let outcome = self.registry.replace_from_friends(&friends).await;
        info!(
            added = outcome.added,
            removed = outcome.removed,
            total = outcome.total,
            "conversation list updated"
        );
        if outcome.added > 0 {
            self.trigger_token_issuance();
        }
        Ok(outcome)
    }

    /// Issues a token to every conversation without one and delivers it into
    /// that conversation. Returns how many tokens were delivered.
    pub async fn issue_missing_tokens(&self) -> Result<usize, RelayError> {
        let mut issued = 0;
        let mut failed = 0;

        for conversation in self.registry.without_token().await {
            let conversation_id = conversation.conversation_id;
            if !conversation.has_cipher_key() {
                warn!(%conversation_id, "conversation has no cipher key; token not issued");
                failed += 1;
                continue;
            }

            let Some(token) = self.assign_fresh_token(conversation_id).await else {
                continue;
            };

            match self.send_encrypted(&conversation, &token).await {
                Ok(()) => {
                    issued += 1;
                    info!(%conversation_id, user_id = %conversation.user_id, "token delivered");
                }
                Err(err) => {
                    failed += 1;
                    let reverted = self.registry.revoke_token(conversation_id, &token).await;
                    warn!(%conversation_id, reverted, error = %err, "token delivery failed");
                }
            }
        }

        if failed > 0 {
            return Err(RelayError::TokenIssuanceIncomplete { failed });
        }
        Ok(issued)
    }

    async fn assign_fresh_token(&self, conversation_id: ConversationId) -> Option<String> {
        for _ in 0..TOKEN_GENERATION_ATTEMPTS {
            let token = generate_token();
            match self.registry.assign_token(conversation_id, &token).await {
                TokenAssignment::Assigned => return Some(token),
                TokenAssignment::TokenInUse => continue,
                TokenAssignment::AlreadyIssued => {
                    debug!(%conversation_id, "token issued concurrently; skipping");
                    return None;
                }
                TokenAssignment::UnknownConversation => {
                    debug!(%conversation_id, "conversation vanished before token issuance");
                    return None;
                }
            }
        }
        warn!(%conversation_id, "could not generate an unused token");
        None
    }

    /// Accepts every friend request that is still open.
    pub async fn accept_pending_friend_requests(self: &Arc<Self>) -> Result<usize, RelayError> {
        let requests = self.client.my_requests().await.map_err(|err| {
            warn!(error = %format!("{err:#}"), "listing friend requests failed");
            RelayError::FriendRequestsIncomplete { failed: 1 }
        })?;

        let mut accepted = 0;
        let mut failed = 0;
        for request in requests.iter().filter(|request| !request.completed) {
            match self.client.complete_request(request.id, true).await {
                Ok(()) => {
                    accepted += 1;
                    info!(request_id = %request.id, creator = request.creator_name(), "friend request accepted");
                }
                Err(err) => {
                    failed += 1;
                    warn!(request_id = %request.id, error = %format!("{err:#}"), "accepting friend request failed");
                }
            }
        }

        if accepted > 0 {
            self.trigger_conversation_refresh();
        }
        if failed > 0 {
            return Err(RelayError::FriendRequestsIncomplete { failed });
        }
        Ok(accepted)
    }

    /// Encrypts `content` for the conversation owning `token` and sends it.
    pub async fn send_by_token(&self, token: &str, content: &str) -> Result<(), RelayError> {
        if content.is_empty() {
            return Err(RelayError::ContentMissing);
        }
        let conversation = self.registry.resolve(token).await?;
        self.send_encrypted(&conversation, content).await
    }

    async fn send_encrypted(&self, conversation: &Conversation, content: &str) -> Result<(), RelayError> {
        let conversation_id = conversation.conversation_id;
        if !conversation.has_cipher_key() {
            return Err(RelayError::MissingCipherKey(conversation_id));
        }
        let ciphertext = self
            .cipher
            .encrypt(content, &conversation.aes_key)
            .map_err(|err| RelayError::MessageSendFailure(err.to_string()))?;

        self.retry
            .retry("send message", || {
                self.client.send_message(conversation_id, &ciphertext)
            })
            .await
            .map_err(|err| RelayError::MessageSendFailure(format!("{err:#}")))
    }

    /// Clears the token of `conversation_id`. Returns `false` for an unknown
    /// conversation.
    pub async fn revoke_token(&self, conversation_id: ConversationId) -> bool {
        self.registry.clear_token(conversation_id).await
    }

    pub fn trigger_conversation_refresh(self: &Arc<Self>) -> bool {
        let service = Arc::clone(self);
        self.tasks
            .try_run(BackgroundTask::RefreshConversations, async move {
                service.refresh_from_friend_list().await.map(|_| ())
            })
            .is_some()
    }

    pub fn trigger_token_issuance(self: &Arc<Self>) -> bool {
        let service = Arc::clone(self);
        self.tasks
            .try_run(BackgroundTask::IssueTokens, async move {
                service.issue_missing_tokens().await.map(|_| ())
            })
            .is_some()
    }

    pub fn trigger_friend_acceptance(self: &Arc<Self>) -> bool {
        let service = Arc::clone(self);
        self.tasks
            .try_run(BackgroundTask::AcceptFriendRequests, async move {
                service.accept_pending_friend_requests().await.map(|_| ())
            })
            .is_some()
    }
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;
